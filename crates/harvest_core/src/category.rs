use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A type of record fetched from the feed API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Groups,
    Users,
    UserRelationships,
    Publications,
    Relationships,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CategoryError {
    #[error("unknown category {0:?} (expected one of groups, users, user-relationships, publications, relationships)")]
    Unknown(String),
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Groups,
        Category::Users,
        Category::UserRelationships,
        Category::Publications,
        Category::Relationships,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Groups => "groups",
            Category::Users => "users",
            Category::UserRelationships => "user-relationships",
            Category::Publications => "publications",
            Category::Relationships => "relationships",
        }
    }

    /// Qualified name of the element that carries one record inside a feed entry.
    pub fn record_element(self) -> &'static str {
        match self {
            Category::Groups => "api:user-group",
            Category::Users | Category::Publications => "api:object",
            Category::UserRelationships | Category::Relationships => "api:relationship",
        }
    }

    /// Selector matching the record elements of a page of this category.
    pub fn record_selector(self) -> String {
        format!("//atom:entry/{}", self.record_element())
    }

    /// Selector matching the id attribute of every record of a page.
    pub fn id_selector(self) -> String {
        format!("{}/@id", self.record_selector())
    }

    /// Categories fetched as comma-joined id batches.
    pub fn is_batch(self) -> bool {
        matches!(self, Category::Publications | Category::Relationships)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| CategoryError::Unknown(s.to_string()))
    }
}
