//! Extension negotiation.
//!
//! The VERSION exchange carries (name, data) pairs. Each side records what
//! the peer advertised; before invoking an extension the client checks the
//! set and falls back to the standard operation when the pair is absent.
//! Unknown pairs are ignored.

use std::collections::HashMap;

/// `posix-rename@openssh.com`: rename(2) semantics, replacing the target.
pub const POSIX_RENAME: &str = "posix-rename@openssh.com";
/// `hardlink@openssh.com`: create a hard link.
pub const HARDLINK: &str = "hardlink@openssh.com";
/// `fsync@openssh.com`: flush an open handle to stable storage.
pub const FSYNC: &str = "fsync@openssh.com";
/// `statvfs@openssh.com`: filesystem statistics.
pub const STATVFS: &str = "statvfs@openssh.com";
/// `limits@openssh.com`: server limits query.
pub const LIMITS: &str = "limits@openssh.com";

/// One (name, data) pair from the VERSION exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    /// Extension name, conventionally `name@domain`.
    pub name: String,
    /// Version or payload string; `"1"` for most OpenSSH extensions.
    pub data: String,
}

impl Extension {
    /// Creates a pair.
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// The extension pairs a peer advertised.
#[derive(Debug, Clone, Default)]
pub struct ExtensionSet {
    pairs: HashMap<String, String>,
}

impl ExtensionSet {
    /// Records advertised pairs, keeping the first occurrence of a name.
    pub fn from_pairs(pairs: &[Extension]) -> Self {
        let mut map = HashMap::with_capacity(pairs.len());
        for ext in pairs {
            map.entry(ext.name.clone()).or_insert_with(|| ext.data.clone());
        }
        Self { pairs: map }
    }

    /// True when the peer advertised `name`.
    pub fn supports(&self, name: &str) -> bool {
        self.pairs.contains_key(name)
    }

    /// The data string advertised for `name`, if any.
    pub fn data(&self, name: &str) -> Option<&str> {
        self.pairs.get(name).map(String::as_str)
    }

    /// Number of recorded pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when the peer advertised nothing.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// The pairs this implementation's server advertises in VERSION.
pub fn server_extensions() -> Vec<Extension> {
    vec![
        Extension::new(POSIX_RENAME, "1"),
        Extension::new(HARDLINK, "1"),
        Extension::new(FSYNC, "1"),
        Extension::new(STATVFS, "2"),
        Extension::new(LIMITS, "1"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_fallback_gate() {
        let set = ExtensionSet::from_pairs(&server_extensions());
        assert!(set.supports(POSIX_RENAME));
        assert_eq!(set.data(STATVFS), Some("2"));
        assert!(!set.supports("copy-data"));
    }

    #[test]
    fn test_duplicate_names_keep_first() {
        let set = ExtensionSet::from_pairs(&[
            Extension::new("x@example.com", "1"),
            Extension::new("x@example.com", "2"),
        ]);
        assert_eq!(set.data("x@example.com"), Some("1"));
        assert_eq!(set.len(), 1);
    }
}
