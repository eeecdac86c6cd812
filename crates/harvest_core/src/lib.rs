//! Harvest core: pure group-closure engine, record categories, page naming
//! and feed query construction. Nothing in this crate touches the network or
//! the filesystem.
mod category;
mod closure;
mod ids;
mod page;
mod query;

pub use category::{Category, CategoryError};
pub use closure::{
    close_groups, ClosureError, ClosureRequest, ClosureSet, Group, HierarchyPolicy, OutputFormat,
};
pub use ids::{compare_ids, normalize_seeds, sort_ids, GroupId};
pub use page::{PageIndex, PageIndexError, PageName, MAX_PAGE_INDEX, PAGE_INDEX_WIDTH};
pub use query::{FeedQuery, QueryError};
