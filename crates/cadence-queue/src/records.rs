//! Persisted record layout.

use cadence_core::{OrderKey, TrackKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key prefix of play queue items.
pub const QUEUE_PREFIX: &str = "Playlist.";
/// Key prefix of stored playlist metadata.
pub const PLAYLIST_META_PREFIX: &str = "StoredPlaylist.";
/// Key prefix of stored playlist items.
pub const PLAYLIST_ITEM_PREFIX: &str = "StoredPlaylistItem.";

/// Stored form of a queue item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueueRecord {
    pub key: TrackKey,
    pub sort_key: OrderKey,
    pub is_random: bool,
}

/// Stored form of a playlist's metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct PlaylistMetaRecord {
    pub id: Uuid,
    pub name: String,
    pub mtime: DateTime<Utc>,
}

/// Stored form of a playlist item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlaylistItemRecord {
    pub key: TrackKey,
    pub sort_key: OrderKey,
}

pub(crate) fn queue_key(id: Uuid) -> String {
    format!("{QUEUE_PREFIX}{id}")
}

pub(crate) fn playlist_meta_key(id: Uuid) -> String {
    format!("{PLAYLIST_META_PREFIX}{id}")
}

pub(crate) fn playlist_items_prefix(playlist: Uuid) -> String {
    format!("{PLAYLIST_ITEM_PREFIX}{playlist}.")
}

pub(crate) fn playlist_item_key(playlist: Uuid, item: Uuid) -> String {
    format!("{PLAYLIST_ITEM_PREFIX}{playlist}.{item}")
}

/// Splits a `StoredPlaylistItem.<playlist>.<item>` key into its ids.
pub(crate) fn parse_playlist_item_key(key: &str) -> Option<(Uuid, Uuid)> {
    let rest = key.strip_prefix(PLAYLIST_ITEM_PREFIX)?;
    let (playlist, item) = rest.split_once('.')?;
    Some((Uuid::parse_str(playlist).ok()?, Uuid::parse_str(item).ok()?))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;

    #[test]
    fn test_queue_record_json_shape() {
        let record = QueueRecord {
            key: "track-1".into(),
            sort_key: OrderKey::initial(),
            is_random: true,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "key": "track-1", "sortKey": "1", "isRandom": true })
        );
    }

    #[test]
    fn test_playlist_item_key_round_trip() {
        let playlist = Uuid::new_v4();
        let item = Uuid::new_v4();
        let key = playlist_item_key(playlist, item);
        assert!(key.starts_with(&playlist_items_prefix(playlist)));
        assert_eq!(parse_playlist_item_key(&key), Some((playlist, item)));
        assert_eq!(parse_playlist_item_key("StoredPlaylistItem.nope"), None);
    }

    #[test]
    fn test_invalid_sort_key_is_rejected() {
        let parsed: Result<QueueRecord, _> =
            serde_json::from_str(r#"{"key":"k","sortKey":"10","isRandom":false}"#);
        assert!(parsed.is_err());
    }
}
