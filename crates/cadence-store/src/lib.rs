//! # cadence-store
//!
//! Ordered key/value persistence for Cadence.
//!
//! The queue and playlist stores write one record per item under a string
//! key with a type prefix (`Playlist.`, `StoredPlaylist.`, ...) and read
//! them back with a prefix scan on startup. Values are opaque strings
//! (JSON in practice).

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use cadence_core::Result;

/// One operation inside a [`KvStore::batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: String, value: String },
    Del { key: String },
}

impl BatchOp {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self::Del { key: key.into() }
    }
}

/// Ordered string key/value store.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`. Deleting a missing key is not an error.
    fn del(&self, key: &str) -> Result<()>;

    /// Apply every operation atomically, in order.
    fn batch(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order.
    fn iterate(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}

/// Smallest string greater than every string starting with `prefix`, or
/// `None` if no such bound exists.
pub(crate) fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(u32::from(last) + 1) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound("Playlist."), Some("Playlist/".into()));
        assert_eq!(prefix_upper_bound("a"), Some("b".into()));
        assert_eq!(prefix_upper_bound(""), None);
    }
}
