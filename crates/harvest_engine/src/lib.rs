//! Harvest engine: HTTP session, feed pagination, XML queries, page and
//! record persistence, and the stage orchestrator.
mod fetch;
mod filename;
mod group_feed;
mod harvest;
mod mirror;
mod paginate;
mod persist;
mod split;
mod types;
mod xml;

pub use fetch::{Credentials, FetchSettings, HttpSession, ReqwestSession};
pub use filename::record_filename;
pub use group_feed::{close_feed, ClosureResult, GroupFeedDocument, GroupFeedError};
pub use harvest::{
    HarvestError, HarvestReport, HarvestSettings, Harvester, StageReport, ALL_KEY,
    GROUPS_SOURCE_STEM, SCOPED_KEY,
};
pub use mirror::{sync_directory, MirrorError, MirrorReport};
pub use paginate::{next_page_link, PaginationError, Paginator, RetryPolicy};
pub use persist::{ensure_output_dir, list_pages, AtomicFileWriter, PersistError};
pub use split::{FeedSplitter, SplitError, SplitSummary, FEED_DIR, RECORDS_DIR};
pub use types::{FailureKind, FetchError, FetchMetadata, FetchOutput};
pub use xml::{
    Element, Selector, XmlDocument, XmlError, XmlNamespaces, ATOM_NAMESPACE,
    DEFAULT_API_NAMESPACE,
};
