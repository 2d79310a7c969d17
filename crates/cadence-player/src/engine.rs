//! Contract of the external decode/encode engine.

use std::future::Future;
use std::path::Path;

use bytes::Bytes;
use cadence_core::Result;
use tokio::sync::broadcast;

/// Handle of a file opened by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle(pub u64);

/// Identifier of an entry in the engine's live playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LiveEntryId(pub u64);

/// One entry of the engine's live playlist.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveEntry {
    pub id: LiveEntryId,
    pub file: FileHandle,
    pub gain: f64,
    pub peak: f64,
}

/// Transport position: the entry at the playhead and seconds into it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub entry: LiveEntryId,
    pub offset: f64,
}

/// A chunk of encoded audio.
///
/// Chunks without an entry are container headers while a new stream is
/// starting, and footers otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub data: Bytes,
    pub entry: Option<LiveEntryId>,
    /// Seconds into the entry at which this chunk starts.
    pub position: f64,
    /// Seconds of audio in this chunk.
    pub duration: f64,
}

/// What the encoder hands out.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderOutput {
    Chunk(EncodedChunk),
    /// The encoder reached the end of the live playlist.
    EndOfPlaylist,
}

/// Events emitted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// The playhead moved to another entry, or past the last one.
    NowPlaying,
    /// Encoded audio is waiting in the encoder.
    BufferReady,
}

/// The decode/encode engine.
///
/// Only [`DecodeWindowSync`](crate::DecodeWindowSync) mutates the live
/// playlist and only [`StreamBufferManager`](crate::StreamBufferManager)
/// pulls encoder output.
pub trait DecodeEngine: Send + Sync + 'static {
    /// Open `path` for decoding. Fails with [`Error::FileOpen`] on
    /// unreadable or corrupt input.
    ///
    /// [`Error::FileOpen`]: cadence_core::Error::FileOpen
    fn open_file(&self, path: &Path) -> impl Future<Output = Result<FileHandle>> + Send;

    fn close_file(&self, file: FileHandle);

    /// Insert `file` into the live playlist before `before`, or at the end.
    fn playlist_insert(
        &self,
        file: FileHandle,
        gain: f64,
        peak: f64,
        before: Option<LiveEntryId>,
    ) -> Result<LiveEntryId>;

    fn playlist_remove(&self, entry: LiveEntryId);

    fn playlist_set_gain(&self, entry: LiveEntryId, gain: f64, peak: f64);

    /// The live playlist in play order.
    fn playlist(&self) -> Vec<LiveEntry>;

    /// Current transport position, `None` past the end of the playlist.
    fn position(&self) -> Option<Position>;

    fn seek(&self, entry: LiveEntryId, offset: f64);

    fn set_playing(&self, playing: bool);

    /// Next piece of encoder output, if any is ready.
    fn encoder_get_buffer(&self) -> Option<EncoderOutput>;

    fn encoder_attach(&self) -> impl Future<Output = Result<()>> + Send;

    fn encoder_detach(&self) -> impl Future<Output = Result<()>> + Send;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
