//! Library track records referenced by queue and playlist items.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Key identifying a track in the library index.
pub type TrackKey = String;

/// Replay gain metadata read from the file's tags (decibels / linear peak).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ReplayGain {
    pub track_gain: Option<f64>,
    pub track_peak: Option<f64>,
    pub album_gain: Option<f64>,
    pub album_peak: Option<f64>,
}

/// A single track in the music library.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryTrack {
    /// Library key.
    pub key: TrackKey,
    /// Absolute path of the audio file.
    pub path: PathBuf,
    /// Track title.
    pub title: String,
    /// Artist name (if tagged).
    pub artist: Option<String>,
    /// Album name (if tagged).
    pub album: Option<String>,
    /// Key grouping tracks of the same album.
    pub album_key: Option<String>,
    /// Track number within the album.
    pub track_number: Option<u32>,
    /// Disc number. Recorded but not consulted by album adjacency.
    pub disc_number: Option<u32>,
    /// Duration in seconds.
    pub duration: Option<f64>,
    /// Loudness normalisation data.
    pub replay_gain: ReplayGain,
}

impl LibraryTrack {
    pub fn new(key: impl Into<TrackKey>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let title = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            key: key.into(),
            path,
            title,
            artist: None,
            album: None,
            album_key: None,
            track_number: None,
            disc_number: None,
            duration: None,
            replay_gain: ReplayGain::default(),
        }
    }

    #[must_use]
    pub fn with_album(mut self, album_key: impl Into<String>, track_number: Option<u32>) -> Self {
        self.album_key = Some(album_key.into());
        self.track_number = track_number;
        self
    }

    #[must_use]
    pub const fn with_replay_gain(mut self, replay_gain: ReplayGain) -> Self {
        self.replay_gain = replay_gain;
        self
    }

    /// True when `other` is the album neighbour `offset` tracks away.
    ///
    /// Both tracks need the same non-empty album key and known track
    /// numbers that differ by exactly `offset`.
    pub fn is_album_neighbor(&self, other: &Self, offset: i64) -> bool {
        let same_album = self
            .album_key
            .as_deref()
            .is_some_and(|key| !key.is_empty() && other.album_key.as_deref() == Some(key));
        if !same_album {
            return false;
        }
        match (self.track_number, other.track_number) {
            (Some(mine), Some(theirs)) => i64::from(mine) + offset == i64::from(theirs),
            _ => false,
        }
    }
}
