//! Core domain types for Cadence.

pub mod playlist;
pub mod queue;
pub mod track;

pub use playlist::{Playlist, PlaylistItem};
pub use queue::{sort_ordered, Ordered, PlaybackState, QueueItem, RepeatMode};
pub use track::{LibraryTrack, ReplayGain, TrackKey};
