//! Groups feed loading and closure rendering.
//!
//! Each `atom:entry` of a groups feed carries one `api:user-group` element.
//! Its hierarchy links are `api:child` and `api:parent` elements nested
//! anywhere inside the group element, each naming the other group by its `id`
//! attribute.

use harvest_core::{close_groups, ClosureError, ClosureRequest, ClosureSet, Group, OutputFormat};
use harvest_logging::{harvest_debug, harvest_warn};
use thiserror::Error;

use crate::xml::{Element, XmlDocument, XmlError, XmlNamespaces};

#[derive(Debug, Error)]
pub enum GroupFeedError {
    #[error("unreadable groups feed: {0}")]
    Xml(#[from] XmlError),
    #[error(transparent)]
    Closure(#[from] ClosureError),
}

/// One logical groups feed, possibly spread over several pages.
#[derive(Debug, Clone)]
pub struct GroupFeedDocument {
    pages: Vec<XmlDocument>,
}

/// Outcome of [`close_feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureResult {
    pub ids: ClosureSet,
    /// Filtered pages, in input order; present for [`OutputFormat::Feed`].
    pub feed: Option<Vec<String>>,
}

impl GroupFeedDocument {
    pub fn new(pages: Vec<XmlDocument>) -> Self {
        Self { pages }
    }

    pub fn parse(text: impl Into<String>, namespaces: XmlNamespaces) -> Result<Self, XmlError> {
        Ok(Self::new(vec![XmlDocument::parse(text, namespaces)?]))
    }

    pub fn pages(&self) -> &[XmlDocument] {
        &self.pages
    }

    /// Every group of every page, in document order.
    pub fn groups(&self) -> Result<Vec<Group>, XmlError> {
        let mut groups = Vec::new();
        for page in &self.pages {
            let api = page.namespaces().api.as_str();
            for element in page.select("//api:user-group")? {
                let Some(id) = element.attribute("id") else {
                    harvest_warn!("Skipping api:user-group without an id attribute");
                    continue;
                };
                let mut group = Group::new(id);
                for link in element.descendants() {
                    let Some(target) = link.attribute("id") else {
                        continue;
                    };
                    let targets = if link.is(api, "child") {
                        &mut group.child_ids
                    } else if link.is(api, "parent") {
                        &mut group.parent_ids
                    } else {
                        continue;
                    };
                    if !targets.iter().any(|known| known == target) {
                        targets.push(target.to_string());
                    }
                }
                groups.push(group);
            }
        }
        Ok(groups)
    }
}

/// Close `request.seeds` over the feed and render the result.
///
/// For feed output every page is filtered on its own: entries whose group is
/// outside the closure are removed, as are `api:child`/`api:parent` links
/// pointing outside it. All other bytes are kept.
pub fn close_feed(
    doc: &GroupFeedDocument,
    request: &ClosureRequest,
) -> Result<ClosureResult, GroupFeedError> {
    let groups = doc.groups()?;
    let ids = close_groups(&groups, request)?;
    harvest_debug!(
        "Closure of {} seed(s) over {} group(s): {} id(s)",
        request.seeds.len(),
        groups.len(),
        ids.len()
    );

    let feed = match request.output {
        OutputFormat::Ids => None,
        OutputFormat::Feed => Some(
            doc.pages
                .iter()
                .map(|page| filter_page(page, &ids))
                .collect::<Result<Vec<_>, _>>()?,
        ),
    };
    Ok(ClosureResult { ids, feed })
}

fn filter_page(page: &XmlDocument, ids: &ClosureSet) -> Result<String, XmlError> {
    let namespaces = page.namespaces();
    let mut doomed: Vec<Element<'_>> = Vec::new();

    for group in page.select("//api:user-group")? {
        let keep = group.attribute("id").is_some_and(|id| ids.contains(id));
        if !keep {
            // The whole entry goes; a bare group element goes on its own.
            doomed.push(group.ancestor(&namespaces.atom, "entry").unwrap_or(group));
            continue;
        }
        doomed.extend(group.descendants().filter(|link| {
            let is_link =
                link.is(&namespaces.api, "child") || link.is(&namespaces.api, "parent");
            is_link && link.attribute("id").is_some_and(|id| !ids.contains(id))
        }));
    }

    Ok(page.without_elements(doomed))
}
