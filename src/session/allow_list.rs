//! Correspondents permitted to receive broadcasts, issue commands and hold
//! presence subscriptions.

/// Bare part of an address: everything before the first `/`.
pub fn bare_jid(address: &str) -> &str {
    address.split_once('/').map_or(address, |(bare, _)| bare)
}

/// Sorted, read-only list of bare identifiers.
///
/// Sorted once at construction; lookups are binary searches. Duplicates are
/// kept so a broadcast reaches each configured entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    entries: Vec<String>,
}

impl AllowList {
    pub fn new(mut entries: Vec<String>) -> Self {
        entries.sort();
        Self { entries }
    }

    pub fn contains(&self, bare: &str) -> bool {
        self.entries
            .binary_search_by(|entry| entry.as_str().cmp(bare))
            .is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
