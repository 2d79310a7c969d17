//! # cadence-server
//!
//! Configuration, logging, library ingest and the [`Core`] facade that
//! wires the queue, playlists, decode window and stream fan-out together
//! around a [`DecodeEngine`](cadence_player::DecodeEngine).

pub mod config;
pub mod core;
pub mod ingest;
pub mod telemetry;

pub use crate::config::Config;
pub use crate::core::{Core, SharedPlaylists};
pub use crate::ingest::{ExclusiveGuard, LibraryIngest, TrackScanner};
