use thiserror::Error;
use url::Url;

use crate::Category;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("invalid API base url {url:?}: {message}")]
    InvalidBase { url: String, message: String },
    #[error("invalid request path {path:?}: {message}")]
    InvalidPath { path: String, message: String },
    #[error("category {0} is not fetched by id batch")]
    NotBatchable(Category),
}

/// Builds the feed URLs issued by a harvest, relative to the API base URL.
///
/// Every feed query asks for full detail and a fixed page size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    base: Url,
    per_page: u32,
}

impl FeedQuery {
    pub fn new(base_url: &str, per_page: u32) -> Result<Self, QueryError> {
        let mut base = Url::parse(base_url).map_err(|err| QueryError::InvalidBase {
            url: base_url.to_string(),
            message: err.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(QueryError::InvalidBase {
                url: base_url.to_string(),
                message: "url cannot be a base".to_string(),
            });
        }
        // Without the trailing slash `join` would replace the last path segment.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.set_query(None);
        Ok(Self { base, per_page })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn groups(&self) -> Url {
        self.feed("groups", &[])
    }

    /// All users, or the explicit members of one group.
    pub fn users(&self, group: Option<&str>) -> Url {
        match group {
            Some(group) => self.feed("users", &[("groups", group)]),
            None => self.feed("users", &[]),
        }
    }

    pub fn user_relationships(&self, user_id: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["users", user_id, "relationships"]);
        }
        self.with_feed_params(url, &[])
    }

    /// One batch query for a comma-joined id list; `None` when there is nothing to ask for.
    pub fn batch(&self, category: Category, ids: &[String]) -> Result<Option<Url>, QueryError> {
        if !category.is_batch() {
            return Err(QueryError::NotBatchable(category));
        }
        if ids.is_empty() {
            return Ok(None);
        }
        let joined = ids.join(",");
        Ok(Some(self.feed(category.as_str(), &[("ids", joined.as_str())])))
    }

    /// Resolve a path relative to the API base, or pass an absolute URL through.
    pub fn resolve(&self, path_or_url: &str) -> Result<Url, QueryError> {
        if let Ok(url) = Url::parse(path_or_url) {
            return Ok(url);
        }
        self.base
            .join(path_or_url.trim_start_matches('/'))
            .map_err(|err| QueryError::InvalidPath {
                path: path_or_url.to_string(),
                message: err.to_string(),
            })
    }

    fn feed(&self, resource: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(resource);
        }
        self.with_feed_params(url, params)
    }

    fn with_feed_params(&self, mut url: Url, params: &[(&str, &str)]) -> Url {
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
            pairs
                .append_pair("detail", "full")
                .append_pair("per-page", &self.per_page.to_string());
        }
        url
    }
}
