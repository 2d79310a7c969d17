//! # cadence-player
//!
//! Drives the external decode/encode engine for Cadence.
//!
//! - [`DecodeWindowSync`] keeps a small window of opened tracks around the
//!   current queue item and mirrors it into the engine's live playlist.
//! - [`StreamBufferManager`] pulls encoded audio from the engine and fans it
//!   out to any number of listeners.
//!
//! Both take an explicit handle to the engine at construction.

mod attach;
mod engine;
mod gain;
mod stream;
mod window;

#[cfg(test)]
mod testing;

pub use attach::{AttachState, Attachment, Transition};
pub use engine::{
    DecodeEngine, EncodedChunk, EncoderOutput, EngineEvent, FileHandle, LiveEntry, LiveEntryId,
    Position,
};
pub use gain::{db_to_float, gain_and_peak, GainConfig};
pub use stream::{ListenerId, StreamBufferManager, StreamConfig};
pub use window::{DecodeWindowSync, WindowConfig};
