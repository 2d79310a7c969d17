//! In-memory store used by tests and ephemeral sessions.

use std::collections::BTreeMap;
use std::ops::Bound;

use cadence_core::Result;
use parking_lot::RwLock;

use crate::{prefix_upper_bound, BatchOp, KvStore};

/// [`KvStore`] backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn del(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut entries = self.entries.write();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                BatchOp::Del { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iterate(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let upper = prefix_upper_bound(prefix).map_or(Bound::Unbounded, Bound::Excluded);
        let entries = self.entries.read();
        Ok(entries
            .range::<str, _>((Bound::Included(prefix), upper.as_ref().map(String::as_str)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;

    #[test]
    fn test_prefix_iteration_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        store.put("Playlist.b", "2").unwrap();
        store.put("Playlist.a", "1").unwrap();
        store.put("PlaylistX", "x").unwrap();
        store.put("StoredPlaylist.a", "s").unwrap();

        let entries = store.iterate("Playlist.").unwrap();
        assert_eq!(
            entries,
            vec![
                ("Playlist.a".to_string(), "1".to_string()),
                ("Playlist.b".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_batch_applies_in_order() {
        let store = MemoryStore::new();
        store
            .batch(vec![
                BatchOp::put("k", "1"),
                BatchOp::del("k"),
                BatchOp::put("j", "2"),
            ])
            .unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        assert_eq!(store.get("j").unwrap(), Some("2".into()));
        assert_eq!(store.len(), 1);
    }
}
