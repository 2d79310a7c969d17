//! Read access to the library index.
//!
//! Scanning and tag extraction live outside the core; the queue and the
//! decode window only need to resolve track keys to records.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::types::{LibraryTrack, TrackKey};

/// Lookup of library tracks by key.
pub trait Library: Send + Sync {
    fn track(&self, key: &str) -> Option<LibraryTrack>;

    fn contains(&self, key: &str) -> bool {
        self.track(key).is_some()
    }
}

/// In-memory library index fed by the scanner.
#[derive(Debug, Default)]
pub struct MemoryLibrary {
    tracks: RwLock<HashMap<TrackKey, LibraryTrack>>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a track record.
    pub fn upsert(&self, track: LibraryTrack) {
        self.tracks.write().insert(track.key.clone(), track);
    }

    pub fn remove(&self, key: &str) -> Option<LibraryTrack> {
        self.tracks.write().remove(key)
    }

    /// Key of the track stored at `path`, if any.
    pub fn key_for_path(&self, path: &std::path::Path) -> Option<TrackKey> {
        self.tracks
            .read()
            .values()
            .find(|track| track.path == path)
            .map(|track| track.key.clone())
    }

    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
    }
}

impl Library for MemoryLibrary {
    fn track(&self, key: &str) -> Option<LibraryTrack> {
        self.tracks.read().get(key).cloned()
    }

    fn contains(&self, key: &str) -> bool {
        self.tracks.read().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_lookup() {
        let library = MemoryLibrary::new();
        library.upsert(LibraryTrack::new("k1", "/music/one.mp3"));

        assert!(library.contains("k1"));
        assert!(!library.contains("k2"));
        assert_eq!(
            library.key_for_path(std::path::Path::new("/music/one.mp3")),
            Some("k1".to_string())
        );

        library.remove("k1");
        assert!(library.is_empty());
    }
}
