//! Entry selection.

use std::collections::BTreeSet;
use std::fmt;

use crate::{Error, Result};

/// Which entries a session or extraction acts on.
///
/// Indices are 1-based and count every header in encounter order,
/// directories included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// The entry at a 1-based position.
    ByIndex(usize),
    /// Entries at any of these 1-based positions.
    ByIndices(BTreeSet<usize>),
    /// The entry with exactly this pathname.
    ByName(String),
    /// Entries with any of these pathnames.
    ByNames(BTreeSet<String>),
    /// Every entry; a read session streams the first one.
    All,
    /// The sole pseudo-entry of a raw (unframed) stream.
    RawSingle,
}

impl Selector {
    /// Selects by exact pathname.
    pub fn by_name(name: impl Into<String>) -> Self {
        Selector::ByName(name.into())
    }

    /// Selects by 1-based index.
    pub fn by_index(index: usize) -> Self {
        Selector::ByIndex(index)
    }

    /// Selects any of the given pathnames.
    pub fn by_names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Selector::ByNames(names.into_iter().map(Into::into).collect())
    }

    /// Selects any of the given 1-based indices.
    pub fn by_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        Selector::ByIndices(indices.into_iter().collect())
    }

    /// Decides whether the header at `index` (1-based) named `path` is selected.
    ///
    /// Raw mode matches first, then pathnames, then positions.
    pub fn matches(&self, index: usize, path: &str) -> bool {
        match self {
            Selector::RawSingle | Selector::All => true,
            Selector::ByName(name) => name == path,
            Selector::ByNames(names) => names.contains(path),
            Selector::ByIndex(i) => *i == index,
            Selector::ByIndices(indices) => indices.contains(&index),
        }
    }

    /// Rejects index 0, which can never match.
    pub(crate) fn validate(&self) -> Result<()> {
        let has_zero = match self {
            Selector::ByIndex(i) => *i == 0,
            Selector::ByIndices(indices) => indices.contains(&0),
            _ => false,
        };
        if has_zero {
            return Err(Error::InvalidOption(
                "entry indices are 1-based".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Selector {
    fn default() -> Self {
        Selector::All
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::ByIndex(i) => write!(f, "index {i}"),
            Selector::ByIndices(indices) => {
                let list: Vec<String> = indices.iter().map(usize::to_string).collect();
                write!(f, "indices [{}]", list.join(", "))
            }
            Selector::ByName(name) => write!(f, "'{name}'"),
            Selector::ByNames(names) => {
                let list: Vec<&str> = names.iter().map(String::as_str).collect();
                write!(f, "names [{}]", list.join(", "))
            }
            Selector::All => f.write_str("any entry"),
            Selector::RawSingle => f.write_str("raw stream"),
        }
    }
}

impl From<&str> for Selector {
    fn from(name: &str) -> Self {
        Selector::by_name(name)
    }
}

impl From<usize> for Selector {
    fn from(index: usize) -> Self {
        Selector::ByIndex(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_match() {
        let selector = Selector::by_name("dir/b.txt");
        assert!(selector.matches(7, "dir/b.txt"));
        assert!(!selector.matches(2, "b.txt"));
    }

    #[test]
    fn test_index_match_is_one_based() {
        let selector = Selector::by_index(2);
        assert!(!selector.matches(1, "a"));
        assert!(selector.matches(2, "b"));
    }

    #[test]
    fn test_sets() {
        let names = Selector::by_names(["a", "c"]);
        assert!(names.matches(9, "c"));
        assert!(!names.matches(1, "b"));
        let indices = Selector::by_indices([1, 3]);
        assert!(indices.matches(3, "x"));
        assert!(!indices.matches(2, "x"));
    }

    #[test]
    fn test_zero_index_rejected() {
        assert!(Selector::by_index(0).validate().is_err());
        assert!(Selector::by_indices([0, 1]).validate().is_err());
        assert!(Selector::by_index(1).validate().is_ok());
    }

    #[test]
    fn test_display() {
        assert_eq!(Selector::by_name("x").to_string(), "'x'");
        assert_eq!(Selector::by_indices([2, 1]).to_string(), "indices [1, 2]");
    }
}
