//! Group hierarchy closure.
//!
//! Given the groups of a feed and a set of seed ids, compute the ids reachable
//! by walking up the parent chain and/or down the child links. The parent of a
//! group is the group that lists it as a child.

use std::collections::{HashMap, HashSet, VecDeque};

use harvest_logging::{harvest_debug, harvest_warn};
use thiserror::Error;

use crate::ids::{compare_ids, normalize_seeds, sort_ids, GroupId};

/// One group entry of a groups feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub parent_ids: Vec<GroupId>,
    pub child_ids: Vec<GroupId>,
}

impl Group {
    pub fn new(id: impl Into<GroupId>) -> Self {
        Self {
            id: id.into(),
            parent_ids: Vec::new(),
            child_ids: Vec::new(),
        }
    }

    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<GroupId>,
    {
        self.child_ids.extend(children.into_iter().map(Into::into));
        self
    }

    pub fn with_parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<GroupId>,
    {
        self.parent_ids.extend(parents.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// The sorted id list.
    #[default]
    Ids,
    /// A filtered copy of the source feed.
    Feed,
}

/// What to do when more than one group lists the same child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HierarchyPolicy {
    /// Log a warning and follow the first claimant in document order.
    #[default]
    Warn,
    /// Fail the request.
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureRequest {
    pub seeds: Vec<GroupId>,
    pub include_parents: bool,
    pub include_children: bool,
    pub output: OutputFormat,
    pub hierarchy: HierarchyPolicy,
}

impl ClosureRequest {
    /// Seeds may be given as separate tokens or comma-joined lists.
    pub fn new<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            seeds: normalize_seeds(seeds),
            ..Self::default()
        }
    }

    pub fn with_parents(mut self) -> Self {
        self.include_parents = true;
        self
    }

    pub fn with_children(mut self) -> Self {
        self.include_children = true;
        self
    }

    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }

    pub fn with_hierarchy(mut self, hierarchy: HierarchyPolicy) -> Self {
        self.hierarchy = hierarchy;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClosureError {
    #[error("group {child} is listed as a child of several groups: {}", .parents.join(", "))]
    MultipleParents {
        child: GroupId,
        parents: Vec<GroupId>,
    },
}

/// Sorted, duplicate-free set of group ids produced by [`close_groups`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureSet {
    ids: Vec<GroupId>,
}

impl ClosureSet {
    pub fn from_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = GroupId>,
    {
        Self { ids: sort_ids(ids) }
    }

    pub fn ids(&self) -> &[GroupId] {
        &self.ids
    }

    pub fn into_ids(self) -> Vec<GroupId> {
        self.ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids
            .binary_search_by(|probe| compare_ids(probe, id))
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Compute the closure of `request.seeds` over `groups`.
///
/// Seeds that are not groups of the feed are ignored; if none resolve the
/// result is empty. Both walks keep a visited set, so cyclic data terminates.
pub fn close_groups(
    groups: &[Group],
    request: &ClosureRequest,
) -> Result<ClosureSet, ClosureError> {
    let index = GroupIndex::new(groups);
    if request.include_parents {
        index.check_single_parent(request.hierarchy)?;
    }

    let seeds: Vec<&str> = request
        .seeds
        .iter()
        .map(String::as_str)
        .filter(|seed| {
            let known = index.contains(seed);
            if !known {
                harvest_debug!("Seed group {} is not in the feed; ignoring", seed);
            }
            known
        })
        .collect();

    let mut members: HashSet<&str> = seeds.iter().copied().collect();

    if request.include_parents {
        let mut walked: HashSet<&str> = HashSet::new();
        for &seed in &seeds {
            let mut current = seed;
            // Stop at the root, or where an earlier walk already climbed from.
            while walked.insert(current) {
                match index.parent_of(current) {
                    Some(parent) => {
                        members.insert(parent);
                        current = parent;
                    }
                    None => break,
                }
            }
        }
    }

    if request.include_children {
        let mut queue: VecDeque<&str> = seeds
            .iter()
            .flat_map(|seed| index.children_of(seed))
            .collect();
        while let Some(id) = queue.pop_front() {
            if !index.contains(id) || !members.insert(id) {
                continue;
            }
            queue.extend(index.children_of(id));
        }
    }

    Ok(ClosureSet::from_ids(members.into_iter().map(str::to_string)))
}

struct GroupIndex<'a> {
    by_id: HashMap<&'a str, &'a Group>,
    /// Groups listing each child, in document order.
    claims: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> GroupIndex<'a> {
    fn new(groups: &'a [Group]) -> Self {
        let mut by_id: HashMap<&str, &Group> = HashMap::with_capacity(groups.len());
        let mut claims: HashMap<&str, Vec<&str>> = HashMap::new();
        for group in groups {
            by_id.entry(group.id.as_str()).or_insert(group);
            for child in &group.child_ids {
                let parents = claims.entry(child.as_str()).or_default();
                if !parents.contains(&group.id.as_str()) {
                    parents.push(group.id.as_str());
                }
            }
        }
        Self { by_id, claims }
    }

    fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    fn parent_of(&self, id: &str) -> Option<&'a str> {
        self.claims
            .get(id)
            .and_then(|parents| parents.first().copied())
    }

    fn children_of(&self, id: &str) -> impl Iterator<Item = &'a str> + '_ {
        self.by_id
            .get(id)
            .copied()
            .into_iter()
            .flat_map(|group| group.child_ids.iter().map(String::as_str))
    }

    fn check_single_parent(&self, policy: HierarchyPolicy) -> Result<(), ClosureError> {
        let mut ambiguous: Vec<(&str, &Vec<&str>)> = self
            .claims
            .iter()
            .filter(|(_, parents)| parents.len() > 1)
            .map(|(child, parents)| (*child, parents))
            .collect();
        ambiguous.sort_by(|a, b| compare_ids(a.0, b.0));

        for (child, parents) in ambiguous {
            match policy {
                HierarchyPolicy::Warn => harvest_warn!(
                    "Group {} has several parents ({}); following {}",
                    child,
                    parents.join(", "),
                    parents[0]
                ),
                HierarchyPolicy::Reject => {
                    return Err(ClosureError::MultipleParents {
                        child: child.to_string(),
                        parents: parents.iter().map(|p| p.to_string()).collect(),
                    })
                }
            }
        }
        Ok(())
    }
}
