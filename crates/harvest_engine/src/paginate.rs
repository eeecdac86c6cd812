use std::collections::HashSet;
use std::time::Duration;

use harvest_core::PageIndex;
use harvest_logging::{harvest_debug, harvest_info, harvest_warn};
use thiserror::Error;
use url::Url;

use crate::fetch::HttpSession;
use crate::persist::PersistError;
use crate::xml::{XmlDocument, XmlError, XmlNamespaces};
use crate::{FetchError, FetchOutput};

const ATOM_NEXT: &str = "/atom:feed/atom:link[@rel='next']/@href";
const API_NEXT: &str = "//api:page[@position='next']/@href";

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("request for {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("could not save page: {0}")]
    Persist(#[from] PersistError),
    #[error("unreadable page: {0}")]
    Xml(#[from] XmlError),
    #[error("next link {href:?} of {url} is not a valid url: {message}")]
    InvalidLink {
        url: String,
        href: String,
        message: String,
    },
    #[error("page sequence starting at {base} has more than 1000 pages")]
    PageLimit { base: String },
    #[error("pagination cycle: {url} was already requested")]
    Cycle { url: String },
}

/// Extra attempts for transient request failures, with linear back-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 0,
            backoff: Duration::from_secs(2),
        }
    }
}

enum PageState {
    Requesting { url: String, index: PageIndex },
    Saving { url: String, index: PageIndex, body: Vec<u8> },
    FollowingNext { url: String, index: PageIndex, body: Vec<u8> },
    Done,
}

/// Walks a paged feed from its first page to the last.
pub struct Paginator<'a> {
    session: &'a dyn HttpSession,
    namespaces: XmlNamespaces,
    retry: RetryPolicy,
    dry_run: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(session: &'a dyn HttpSession, namespaces: XmlNamespaces) -> Self {
        Self {
            session,
            namespaces,
            retry: RetryPolicy::default(),
            dry_run: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Fetch `base` and every page after it, handing each body to `save`
    /// under its zero-based index. Returns the number of pages saved.
    ///
    /// A failure stops the walk; pages saved before it stay saved.
    pub async fn fetch_all<F>(&self, base: &str, mut save: F) -> Result<usize, PaginationError>
    where
        F: FnMut(PageIndex, &[u8]) -> Result<(), PersistError>,
    {
        if self.dry_run {
            harvest_info!("Dry run: would fetch {}", base);
            return Ok(0);
        }

        let mut requested: HashSet<String> = HashSet::new();
        let mut saved = 0usize;
        let mut state = PageState::Requesting {
            url: base.to_string(),
            index: PageIndex::FIRST,
        };

        loop {
            state = match state {
                PageState::Requesting { url, index } => {
                    requested.insert(url.clone());
                    let output = self.get_with_retry(&url).await?;
                    PageState::Saving {
                        url,
                        index,
                        body: output.bytes,
                    }
                }
                PageState::Saving { url, index, body } => {
                    save(index, &body)?;
                    saved += 1;
                    harvest_debug!("Saved page {} ({} bytes) of {}", index, body.len(), url);
                    PageState::FollowingNext { url, index, body }
                }
                PageState::FollowingNext { url, index, body } => {
                    let page = XmlDocument::from_bytes(&body, self.namespaces.clone())?;
                    match next_page_link(&page)? {
                        None => PageState::Done,
                        Some(href) => {
                            let next = resolve_link(&url, &href)?;
                            if requested.contains(&next) {
                                return Err(PaginationError::Cycle { url: next });
                            }
                            let index = index.next().map_err(|_| PaginationError::PageLimit {
                                base: base.to_string(),
                            })?;
                            PageState::Requesting { url: next, index }
                        }
                    }
                }
                PageState::Done => {
                    harvest_info!("Fetched {} page(s) from {}", saved, base);
                    return Ok(saved);
                }
            };
        }
    }

    async fn get_with_retry(&self, url: &str) -> Result<FetchOutput, PaginationError> {
        let mut attempt = 0u32;
        loop {
            match self.session.get(url).await {
                Ok(output) => return Ok(output),
                Err(err) if err.is_transient() && attempt < self.retry.attempts => {
                    attempt += 1;
                    let delay = self.retry.backoff * attempt;
                    harvest_warn!(
                        "Request for {} failed ({}); retry {}/{} in {:?}",
                        url,
                        err,
                        attempt,
                        self.retry.attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(source) => {
                    return Err(PaginationError::Fetch {
                        url: url.to_string(),
                        source,
                    })
                }
            }
        }
    }
}

/// The page's link to its successor, if any.
///
/// The Atom `next` link wins; the API's own pagination element is the
/// fallback.
pub fn next_page_link(page: &XmlDocument) -> Result<Option<String>, XmlError> {
    for selector in [ATOM_NEXT, API_NEXT] {
        if let Some(href) = page
            .select_values(selector)?
            .into_iter()
            .find(|href| !href.trim().is_empty())
        {
            return Ok(Some(href.trim().to_string()));
        }
    }
    Ok(None)
}

fn resolve_link(current: &str, href: &str) -> Result<String, PaginationError> {
    let invalid = |message: String| PaginationError::InvalidLink {
        url: current.to_string(),
        href: href.to_string(),
        message,
    };
    let current = Url::parse(current).map_err(|err| invalid(err.to_string()))?;
    current
        .join(href)
        .map(String::from)
        .map_err(|err| invalid(err.to_string()))
}
