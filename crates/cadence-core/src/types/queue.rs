//! Queue item and playback mode types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TrackKey;
use crate::order_key::{compare_keyed, OrderKey};

/// A single track occurrence in the play queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueItem {
    /// Unique identifier for this queue item.
    pub id: Uuid,
    /// Library track to play.
    pub track_key: TrackKey,
    /// Position in the queue.
    pub sort_key: OrderKey,
    /// Queued automatically as filler rather than requested by a user.
    pub auto_inserted: bool,
}

impl QueueItem {
    pub fn new(track_key: impl Into<TrackKey>, sort_key: OrderKey, auto_inserted: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            track_key: track_key.into(),
            sort_key,
            auto_inserted,
        }
    }
}

/// Anything with an order key and an id that can be laid out in order.
pub trait Ordered {
    fn sort_key(&self) -> &OrderKey;
    fn id(&self) -> Uuid;
}

impl Ordered for QueueItem {
    fn sort_key(&self) -> &OrderKey {
        &self.sort_key
    }

    fn id(&self) -> Uuid {
        self.id
    }
}

/// Sorts items by order key, breaking ties by id.
pub fn sort_ordered<T: Ordered>(items: &mut [T]) {
    items.sort_by(|a, b| compare_keyed((a.sort_key(), &a.id()), (b.sort_key(), &b.id())));
}

/// Queue-level playback state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Paused,
    Playing,
}

/// Repeat mode for playback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// No repeat.
    #[default]
    Off,
    /// Repeat the entire queue.
    All,
    /// Repeat the current track.
    One,
}

impl RepeatMode {
    /// Cycle through repeat modes.
    pub const fn cycle(self) -> Self {
        match self {
            Self::Off => Self::All,
            Self::All => Self::One,
            Self::One => Self::Off,
        }
    }
}
