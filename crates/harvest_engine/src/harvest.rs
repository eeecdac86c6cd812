//! Stage-by-stage harvest of the feed API into `feed/` page files.
//!
//! Each category is one stage. Stages run in the order requested and read
//! only what earlier runs left on disk:
//!
//! | stage                | reads                          | writes                             |
//! |----------------------|--------------------------------|------------------------------------|
//! | `groups`             |                                | `groups-source.all.*`, `groups.*`  |
//! | `users`              | `groups-source.all.*` (seeded) | `users.<group>.*` or `users.all.*` |
//! | `user-relationships` | `raw-records/users/`           | `user-relationships.<user>.*`      |
//! | `relationships`      | `user-relationships.*`         | `relationships.<n>.*`              |
//! | `publications`       | `user-relationships.*`         | `publications.<n>.*`               |

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use harvest_core::{
    compare_ids, Category, ClosureRequest, FeedQuery, GroupId, HierarchyPolicy, OutputFormat,
    PageName, QueryError,
};
use harvest_logging::{harvest_debug, harvest_info, harvest_warn};
use thiserror::Error;
use url::Url;

use crate::fetch::HttpSession;
use crate::group_feed::{close_feed, GroupFeedDocument, GroupFeedError};
use crate::paginate::{PaginationError, Paginator, RetryPolicy};
use crate::persist::{ensure_output_dir, list_pages, AtomicFileWriter, PersistError};
use crate::split::{FEED_DIR, RECORDS_DIR};
use crate::xml::{XmlDocument, XmlError, XmlNamespaces};

/// Stem of the unfiltered groups feed.
pub const GROUPS_SOURCE_STEM: &str = "groups-source";
/// Page key of a query that is not scoped to one group, user or batch.
pub const ALL_KEY: &str = "all";
/// Page key of the seed-scoped groups feed.
pub const SCOPED_KEY: &str = "scoped";

const RELATIONSHIP_IDS: &str = "//api:relationship/@id";
const PUBLICATION_IDS: &str =
    "//api:related[@direction='to']/api:object[@category='publication']/@id";

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("{category} stage failed: {source}")]
    Pagination {
        category: Category,
        #[source]
        source: PaginationError,
    },
    #[error(transparent)]
    GroupFeed(#[from] GroupFeedError),
    #[error("page {path:?} is unreadable: {source}")]
    Xml {
        path: PathBuf,
        #[source]
        source: XmlError,
    },
    #[error("{category} stage needs {path:?}; run the stage that produces it first")]
    MissingInput { category: Category, path: PathBuf },
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Resolved settings of one harvest run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestSettings {
    pub base_url: String,
    pub base_dir: PathBuf,
    pub per_page: u32,
    /// Seed groups; empty means the whole institution.
    pub groups: Vec<GroupId>,
    pub namespaces: XmlNamespaces,
    pub hierarchy: HierarchyPolicy,
    pub retry: RetryPolicy,
    pub dry_run: bool,
}

impl HarvestSettings {
    pub const DEFAULT_PER_PAGE: u32 = 25;

    pub fn new(base_url: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.into(),
            base_dir: base_dir.into(),
            per_page: Self::DEFAULT_PER_PAGE,
            groups: Vec::new(),
            namespaces: XmlNamespaces::default(),
            hierarchy: HierarchyPolicy::default(),
            retry: RetryPolicy::default(),
            dry_run: false,
        }
    }

    pub fn feed_dir(&self) -> PathBuf {
        self.base_dir.join(FEED_DIR)
    }

    pub fn records_dir(&self, category: Category) -> PathBuf {
        self.base_dir.join(RECORDS_DIR).join(category.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub category: Category,
    /// Page sequences requested (or that would be, in a dry run).
    pub queries: usize,
    pub pages: usize,
    /// The stage's input was missing and the stage did nothing.
    pub skipped: bool,
}

impl StageReport {
    fn new(category: Category) -> Self {
        Self {
            category,
            queries: 0,
            pages: 0,
            skipped: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestReport {
    pub stages: Vec<StageReport>,
}

impl HarvestReport {
    pub fn pages(&self) -> usize {
        self.stages.iter().map(|stage| stage.pages).sum()
    }
}

pub struct Harvester<'a> {
    session: &'a dyn HttpSession,
    settings: HarvestSettings,
    query: FeedQuery,
}

impl<'a> Harvester<'a> {
    pub fn new(
        session: &'a dyn HttpSession,
        settings: HarvestSettings,
    ) -> Result<Self, HarvestError> {
        let query = FeedQuery::new(&settings.base_url, settings.per_page)?;
        Ok(Self {
            session,
            settings,
            query,
        })
    }

    pub fn settings(&self) -> &HarvestSettings {
        &self.settings
    }

    /// Run the stages for `categories`, in the order given.
    pub async fn run(&self, categories: &[Category]) -> Result<HarvestReport, HarvestError> {
        if !self.settings.dry_run {
            ensure_output_dir(&self.settings.feed_dir())?;
        }
        let mut report = HarvestReport::default();
        for &category in categories {
            harvest_info!("Harvesting {}", category);
            let mut stage = StageReport::new(category);
            let outcome = match category {
                Category::Groups => self.harvest_groups(&mut stage).await,
                Category::Users => self.harvest_users(&mut stage).await,
                Category::UserRelationships => self.harvest_user_relationships(&mut stage).await,
                Category::Relationships | Category::Publications => {
                    self.harvest_batches(category, &mut stage).await
                }
            };
            match outcome {
                Err(HarvestError::MissingInput { category, path }) if self.settings.dry_run => {
                    harvest_warn!("Dry run: {} stage skipped, {:?} is missing", category, path);
                    stage.skipped = true;
                }
                other => other?,
            }
            harvest_info!(
                "{} stage done: {} page sequence(s), {} page(s)",
                category,
                stage.queries,
                stage.pages
            );
            report.stages.push(stage);
        }
        Ok(report)
    }

    async fn harvest_groups(&self, stage: &mut StageReport) -> Result<(), HarvestError> {
        let category = Category::Groups;
        self.clear_pages(GROUPS_SOURCE_STEM)?;
        let url = self.query.groups();
        self.fetch_pages(category, &url, GROUPS_SOURCE_STEM, ALL_KEY, stage)
            .await?;
        if self.settings.dry_run {
            return Ok(());
        }

        self.clear_pages(category.as_str())?;
        let writer = AtomicFileWriter::new(self.settings.feed_dir());
        let sources = self.source_group_pages(category)?;
        if self.settings.groups.is_empty() {
            for (name, path) in &sources {
                let target = PageName::new(category.as_str(), ALL_KEY, name.index());
                writer.write(&target.file_name(), &fs::read(path)?)?;
            }
            return Ok(());
        }

        let request = ClosureRequest::new(&self.settings.groups)
            .with_parents()
            .with_output(OutputFormat::Feed)
            .with_hierarchy(self.settings.hierarchy);
        let document = self.load_group_feed(&sources)?;
        let result = close_feed(&document, &request)?;
        harvest_info!(
            "Scoped groups feed to {} group(s): {}",
            result.ids.len(),
            result.ids.ids().join(",")
        );
        let filtered = result.feed.unwrap_or_default();
        for ((name, _), page) in sources.iter().zip(filtered) {
            let target = PageName::new(category.as_str(), SCOPED_KEY, name.index());
            writer.write(&target.file_name(), page.as_bytes())?;
        }
        Ok(())
    }

    async fn harvest_users(&self, stage: &mut StageReport) -> Result<(), HarvestError> {
        let category = Category::Users;
        if self.settings.groups.is_empty() {
            self.clear_pages(category.as_str())?;
            let url = self.query.users(None);
            return self
                .fetch_pages(category, &url, category.as_str(), ALL_KEY, stage)
                .await;
        }

        let sources = self.source_group_pages(category)?;
        let request = ClosureRequest::new(&self.settings.groups)
            .with_children()
            .with_hierarchy(self.settings.hierarchy);
        let closure = close_feed(&self.load_group_feed(&sources)?, &request)?;
        if closure.ids.is_empty() {
            harvest_warn!("No configured seed group exists in the groups feed; no users fetched");
        }

        self.clear_pages(category.as_str())?;
        for group in closure.ids.ids() {
            let url = self.query.users(Some(group.as_str()));
            self.fetch_pages(category, &url, category.as_str(), group, stage)
                .await?;
        }
        Ok(())
    }

    async fn harvest_user_relationships(
        &self,
        stage: &mut StageReport,
    ) -> Result<(), HarvestError> {
        let category = Category::UserRelationships;
        let users_dir = self.settings.records_dir(Category::Users);
        let users = record_ids(&users_dir).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => HarvestError::MissingInput {
                category,
                path: users_dir.clone(),
            },
            _ => HarvestError::Io(err),
        })?;

        self.clear_pages(category.as_str())?;
        for user in &users {
            let url = self.query.user_relationships(user);
            self.fetch_pages(category, &url, category.as_str(), user, stage)
                .await?;
        }
        Ok(())
    }

    async fn harvest_batches(
        &self,
        category: Category,
        stage: &mut StageReport,
    ) -> Result<(), HarvestError> {
        let feed_dir = self.settings.feed_dir();
        let input = Category::UserRelationships.as_str();
        let pages = list_pages(&feed_dir, input)?;
        if pages.is_empty() {
            return Err(HarvestError::MissingInput {
                category,
                path: feed_dir.join(format!("{input}.*")),
            });
        }
        let selector = match category {
            Category::Publications => PUBLICATION_IDS,
            _ => RELATIONSHIP_IDS,
        };

        self.clear_pages(category.as_str())?;
        for (batch, (name, path)) in pages.iter().enumerate() {
            let page = self.read_page(path)?;
            let mut ids: Vec<String> = Vec::new();
            for id in page.select_values(selector).map_err(|source| HarvestError::Xml {
                path: path.clone(),
                source,
            })? {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            let Some(url) = self.query.batch(category, &ids)? else {
                harvest_debug!("{}: no {} ids, nothing to fetch", name, category);
                continue;
            };
            let key = batch.to_string();
            self.fetch_pages(category, &url, category.as_str(), &key, stage)
                .await?;
        }
        Ok(())
    }

    async fn fetch_pages(
        &self,
        category: Category,
        url: &Url,
        stem: &str,
        key: &str,
        stage: &mut StageReport,
    ) -> Result<(), HarvestError> {
        let writer = AtomicFileWriter::new(self.settings.feed_dir());
        let paginator = Paginator::new(self.session, self.settings.namespaces.clone())
            .with_retry(self.settings.retry)
            .with_dry_run(self.settings.dry_run);
        let pages = paginator
            .fetch_all(url.as_str(), |index, body| {
                writer
                    .write(&PageName::new(stem, key, index).file_name(), body)
                    .map(|_| ())
            })
            .await
            .map_err(|source| HarvestError::Pagination { category, source })?;
        stage.queries += 1;
        stage.pages += pages;
        Ok(())
    }

    /// Saved pages of the unfiltered groups feed; missing input for `category` when none.
    fn source_group_pages(
        &self,
        category: Category,
    ) -> Result<Vec<(PageName, PathBuf)>, HarvestError> {
        let feed_dir = self.settings.feed_dir();
        let pages = list_pages(&feed_dir, GROUPS_SOURCE_STEM)?;
        if pages.is_empty() {
            return Err(HarvestError::MissingInput {
                category,
                path: feed_dir.join(format!("{GROUPS_SOURCE_STEM}.{ALL_KEY}.*")),
            });
        }
        Ok(pages)
    }

    fn load_group_feed(
        &self,
        pages: &[(PageName, PathBuf)],
    ) -> Result<GroupFeedDocument, HarvestError> {
        let documents = pages
            .iter()
            .map(|(_, path)| self.read_page(path))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GroupFeedDocument::new(documents))
    }

    fn read_page(&self, path: &Path) -> Result<XmlDocument, HarvestError> {
        let bytes = fs::read(path)?;
        XmlDocument::from_bytes(&bytes, self.settings.namespaces.clone()).map_err(|source| {
            HarvestError::Xml {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Remove the pages a previous run left for `stem`, so that a re-run with
    /// other seeds or fewer pages does not leave stale pages behind.
    fn clear_pages(&self, stem: &str) -> Result<(), HarvestError> {
        if self.settings.dry_run {
            return Ok(());
        }
        for (name, path) in list_pages(&self.settings.feed_dir(), stem)? {
            harvest_debug!("Removing stale page {}", name);
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Ids of the records archived in `dir`, in numeric-aware order.
fn record_ids(dir: &Path) -> io::Result<Vec<String>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            ids.push(name.to_string());
        }
    }
    ids.sort_by(|a, b| compare_ids(a, b));
    Ok(ids)
}
