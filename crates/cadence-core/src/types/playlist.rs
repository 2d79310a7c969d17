//! Stored playlists.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::queue::{sort_ordered, Ordered};
use super::TrackKey;
use crate::order_key::OrderKey;

/// One entry of a stored playlist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaylistItem {
    pub id: Uuid,
    pub track_key: TrackKey,
    pub sort_key: OrderKey,
}

impl PlaylistItem {
    pub fn new(track_key: impl Into<TrackKey>, sort_key: OrderKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            track_key: track_key.into(),
            sort_key,
        }
    }
}

impl Ordered for PlaylistItem {
    fn sort_key(&self) -> &OrderKey {
        &self.sort_key
    }

    fn id(&self) -> Uuid {
        self.id
    }
}

/// A named, persisted playlist with its own order key space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Playlist {
    pub id: Uuid,
    pub name: String,
    /// Last modification time.
    pub mtime: DateTime<Utc>,
    pub items: HashMap<Uuid, PlaylistItem>,
}

impl Playlist {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            mtime: Utc::now(),
            items: HashMap::new(),
        }
    }

    /// Items sorted by order key.
    pub fn items_in_order(&self) -> Vec<PlaylistItem> {
        let mut items: Vec<PlaylistItem> = self.items.values().cloned().collect();
        sort_ordered(&mut items);
        items
    }

    pub fn touch(&mut self) {
        self.mtime = Utc::now();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
