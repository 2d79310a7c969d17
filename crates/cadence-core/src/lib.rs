//! # cadence-core
//!
//! Core types, ordering keys, events and error handling for the Cadence
//! music server.

pub mod error;
pub mod events;
pub mod library;
pub mod order_key;
pub mod types;

pub use error::{Error, Result};
pub use events::{EventBus, PlayerEvent, PlaylistEvent, QueueEvent};
pub use library::{Library, MemoryLibrary};
pub use order_key::OrderKey;
pub use types::*;
