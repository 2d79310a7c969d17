//! # cadence-queue
//!
//! The play queue and stored playlists.
//!
//! Both collections keep items in an identity-keyed map and derive their
//! order by sorting on [`OrderKey`](cadence_core::OrderKey), so moving an
//! item rewrites one key and never renumbers its neighbours. Every mutation
//! is applied in memory first and then written to the [`KvStore`] on a
//! best-effort basis.
//!
//! [`KvStore`]: cadence_store::KvStore

mod ordering;
mod playlist;
mod queue;
mod records;

use std::sync::Arc;

use parking_lot::Mutex;

pub use playlist::PlaylistStore;
pub use queue::QueueStore;
pub use records::{PLAYLIST_ITEM_PREFIX, PLAYLIST_META_PREFIX, QUEUE_PREFIX};

/// Queue store shared between front ends and the decode window.
pub type SharedQueue = Arc<Mutex<QueueStore>>;
