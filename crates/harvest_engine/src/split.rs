use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use harvest_core::Category;
use harvest_logging::{harvest_debug, harvest_info, harvest_warn};
use thiserror::Error;

use crate::filename::record_filename;
use crate::mirror::{sync_directory, MirrorError, MirrorReport};
use crate::persist::{list_pages, PersistError};
use crate::xml::{XmlDocument, XmlError, XmlNamespaces};

pub const FEED_DIR: &str = "feed";
pub const RECORDS_DIR: &str = "raw-records";

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("could not list pages: {0}")]
    Persist(#[from] PersistError),
    #[error("page {path:?} is unreadable: {source}")]
    Xml {
        path: PathBuf,
        #[source]
        source: XmlError,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("could not update the record archive: {0}")]
    Mirror(#[from] MirrorError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSummary {
    pub category: Category,
    pub pages: usize,
    pub records: usize,
    pub skipped: usize,
    pub mirror: MirrorReport,
}

/// Splits saved feed pages into one file per record under `raw-records/`.
#[derive(Debug, Clone)]
pub struct FeedSplitter {
    base_dir: PathBuf,
    namespaces: XmlNamespaces,
}

impl FeedSplitter {
    pub fn new(base_dir: impl Into<PathBuf>, namespaces: XmlNamespaces) -> Self {
        Self {
            base_dir: base_dir.into(),
            namespaces,
        }
    }

    pub fn feed_dir(&self) -> PathBuf {
        self.base_dir.join(FEED_DIR)
    }

    pub fn records_dir(&self, category: Category) -> PathBuf {
        self.base_dir.join(RECORDS_DIR).join(category.as_str())
    }

    /// Replace `raw-records/<category>/` with the records of the category's
    /// saved pages.
    ///
    /// Records are extracted into a temporary directory beside the pages and
    /// only then mirrored over the archive, so a failing page leaves the
    /// archive as it was. Without any saved page the archive is not touched.
    pub fn split(&self, category: Category) -> Result<SplitSummary, SplitError> {
        let feed_dir = self.feed_dir();
        let pages = list_pages(&feed_dir, category.as_str())?;
        if pages.is_empty() {
            harvest_warn!(
                "No saved {} pages in {:?}; record archive left as is",
                category,
                feed_dir
            );
            return Ok(SplitSummary {
                category,
                pages: 0,
                records: 0,
                skipped: 0,
                mirror: MirrorReport::default(),
            });
        }

        let staging = tempfile::Builder::new()
            .prefix(".split-")
            .tempdir_in(&feed_dir)?;
        let mut records = 0usize;
        let mut skipped = 0usize;
        for (name, path) in &pages {
            let (written, refused) = self.split_page(category, path, staging.path())?;
            harvest_debug!("{}: {} record(s), {} skipped", name, written, refused);
            records += written;
            skipped += refused;
        }

        let mirror = sync_directory(staging.path(), &self.records_dir(category), true)?;
        staging.close()?;

        harvest_info!(
            "Split {} {} page(s) into {} record(s) ({} copied, {} unchanged, {} removed)",
            pages.len(),
            category,
            records,
            mirror.copied,
            mirror.unchanged,
            mirror.removed
        );
        Ok(SplitSummary {
            category,
            pages: pages.len(),
            records,
            skipped,
            mirror,
        })
    }

    fn split_page(
        &self,
        category: Category,
        path: &Path,
        out_dir: &Path,
    ) -> Result<(usize, usize), SplitError> {
        let xml_error = |source: XmlError| SplitError::Xml {
            path: path.to_path_buf(),
            source,
        };
        let bytes = fs::read(path)?;
        let page = XmlDocument::from_bytes(&bytes, self.namespaces.clone()).map_err(xml_error)?;

        let mut written = 0usize;
        let mut skipped = 0usize;
        for record in page.select(&category.record_selector()).map_err(xml_error)? {
            let id = record.attribute("id").unwrap_or_default();
            let Some(file_name) = record_filename(id) else {
                harvest_warn!("Skipping {} record with unusable id {:?}", category, id);
                skipped += 1;
                continue;
            };
            let mut content = String::with_capacity(XML_DECLARATION.len() + record.span().len());
            content.push_str(XML_DECLARATION);
            content.push_str(&record.standalone_fragment());
            content.push('\n');
            fs::write(out_dir.join(file_name), content)?;
            written += 1;
        }
        Ok((written, skipped))
    }
}
