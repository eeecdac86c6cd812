use std::fmt;

use thiserror::Error;

/// Digits in a saved page's index suffix.
pub const PAGE_INDEX_WIDTH: usize = 3;
/// Highest index representable in [`PAGE_INDEX_WIDTH`] digits.
pub const MAX_PAGE_INDEX: u16 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PageIndexError {
    #[error("page index {0} exceeds the {PAGE_INDEX_WIDTH}-digit limit of {MAX_PAGE_INDEX}")]
    Overflow(u32),
}

/// Zero-based position of a page within one page sequence.
///
/// Bounded to three digits so that file names sort in fetch order; moving
/// past 999 is an error rather than a silently wider name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageIndex(u16);

impl PageIndex {
    pub const FIRST: PageIndex = PageIndex(0);

    pub fn new(value: u32) -> Result<Self, PageIndexError> {
        if value > u32::from(MAX_PAGE_INDEX) {
            return Err(PageIndexError::Overflow(value));
        }
        // Bounded above, so the narrowing cannot truncate.
        Ok(Self(value as u16))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn next(self) -> Result<Self, PageIndexError> {
        Self::new(u32::from(self.0) + 1)
    }
}

impl fmt::Display for PageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = PAGE_INDEX_WIDTH)
    }
}

/// File name of one saved page: `<stem>.<key>.<NNN>`.
///
/// `stem` names the page set (usually a category), `key` the group, user or
/// batch the query was issued for, or `all`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageName {
    stem: String,
    key: String,
    index: PageIndex,
}

impl PageName {
    pub fn new(stem: impl Into<String>, key: impl Into<String>, index: PageIndex) -> Self {
        Self {
            stem: stem.into(),
            key: key.into(),
            index,
        }
    }

    /// Parse a file name produced by [`PageName::file_name`].
    pub fn parse(file_name: &str) -> Option<Self> {
        let (rest, digits) = file_name.rsplit_once('.')?;
        if digits.len() != PAGE_INDEX_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let (stem, key) = rest.split_once('.')?;
        if stem.is_empty() || key.is_empty() {
            return None;
        }
        let index = PageIndex::new(digits.parse().ok()?).ok()?;
        Some(Self::new(stem, key, index))
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn index(&self) -> PageIndex {
        self.index
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}.{}", self.stem, self.key, self.index)
    }
}

impl fmt::Display for PageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}
