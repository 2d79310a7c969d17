//! Scripted in-memory engine for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use cadence_core::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::engine::{
    DecodeEngine, EncodedChunk, EncoderOutput, EngineEvent, FileHandle, LiveEntry, LiveEntryId,
    Position,
};

#[derive(Default)]
pub struct FakeState {
    next_id: u64,
    pub files: HashMap<FileHandle, PathBuf>,
    pub opened: usize,
    pub closed: Vec<FileHandle>,
    pub failing: HashSet<PathBuf>,
    pub playlist: Vec<LiveEntry>,
    pub position: Option<Position>,
    pub seeks: Vec<(LiveEntryId, f64)>,
    pub playing: bool,
    pub output: VecDeque<EncoderOutput>,
    pub attached: bool,
    pub attach_calls: usize,
    pub detach_calls: usize,
}

impl FakeState {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct FakeEngine {
    pub state: Mutex<FakeState>,
    events: broadcast::Sender<EngineEvent>,
}

impl FakeEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(FakeState::default()),
            events,
        }
    }

    pub fn fail_path(&self, path: impl Into<PathBuf>) {
        self.state.lock().failing.insert(path.into());
    }

    /// Paths of the live playlist entries in order.
    pub fn live_paths(&self) -> Vec<PathBuf> {
        let state = self.state.lock();
        state
            .playlist
            .iter()
            .filter_map(|entry| state.files.get(&entry.file).cloned())
            .collect()
    }

    /// Number of files opened and not closed.
    pub fn open_files(&self) -> usize {
        self.state.lock().files.len()
    }

    /// Move the playhead to the next live entry, or past the end.
    pub fn advance(&self) {
        {
            let mut state = self.state.lock();
            let next = state.position.and_then(|position| {
                let index = state.playlist.iter().position(|e| e.id == position.entry)?;
                state.playlist.get(index + 1).map(|e| e.id)
            });
            state.position = next.map(|entry| Position { entry, offset: 0.0 });
        }
        let _ = self.events.send(EngineEvent::NowPlaying);
    }

    pub fn set_offset(&self, offset: f64) {
        let mut state = self.state.lock();
        if let Some(position) = state.position.as_mut() {
            position.offset = offset;
        }
    }

    pub fn push_header(&self, data: &'static [u8]) {
        self.push(EncoderOutput::Chunk(EncodedChunk {
            data: Bytes::from_static(data),
            entry: None,
            position: 0.0,
            duration: 0.0,
        }));
    }

    pub fn push_audio(&self, data: &'static [u8], entry: LiveEntryId, position: f64, duration: f64) {
        self.push(EncoderOutput::Chunk(EncodedChunk {
            data: Bytes::from_static(data),
            entry: Some(entry),
            position,
            duration,
        }));
    }

    pub fn push_end(&self) {
        self.push(EncoderOutput::EndOfPlaylist);
    }

    fn push(&self, output: EncoderOutput) {
        self.state.lock().output.push_back(output);
    }
}

impl DecodeEngine for FakeEngine {
    fn open_file(&self, path: &Path) -> impl Future<Output = Result<FileHandle>> + Send {
        let path = path.to_path_buf();
        let outcome = {
            let mut state = self.state.lock();
            if state.failing.contains(&path) {
                Err(Error::file_open(path.display().to_string(), "unreadable"))
            } else {
                let handle = FileHandle(state.allocate());
                state.opened += 1;
                state.files.insert(handle, path);
                Ok(handle)
            }
        };
        async move {
            tokio::task::yield_now().await;
            outcome
        }
    }

    fn close_file(&self, file: FileHandle) {
        let mut state = self.state.lock();
        state.files.remove(&file);
        state.closed.push(file);
    }

    fn playlist_insert(
        &self,
        file: FileHandle,
        gain: f64,
        peak: f64,
        before: Option<LiveEntryId>,
    ) -> Result<LiveEntryId> {
        let mut state = self.state.lock();
        let id = LiveEntryId(state.allocate());
        let entry = LiveEntry { id, file, gain, peak };
        let index = before
            .and_then(|before| state.playlist.iter().position(|e| e.id == before))
            .unwrap_or(state.playlist.len());
        state.playlist.insert(index, entry);
        if state.position.is_none() {
            state.position = Some(Position {
                entry: id,
                offset: 0.0,
            });
        }
        Ok(id)
    }

    fn playlist_remove(&self, entry: LiveEntryId) {
        let mut state = self.state.lock();
        let Some(index) = state.playlist.iter().position(|e| e.id == entry) else {
            return;
        };
        state.playlist.remove(index);
        if state.position.map(|p| p.entry) == Some(entry) {
            state.position = state.playlist.get(index).map(|e| Position {
                entry: e.id,
                offset: 0.0,
            });
        }
    }

    fn playlist_set_gain(&self, entry: LiveEntryId, gain: f64, peak: f64) {
        let mut state = self.state.lock();
        if let Some(live) = state.playlist.iter_mut().find(|e| e.id == entry) {
            live.gain = gain;
            live.peak = peak;
        }
    }

    fn playlist(&self) -> Vec<LiveEntry> {
        self.state.lock().playlist.clone()
    }

    fn position(&self) -> Option<Position> {
        self.state.lock().position
    }

    fn seek(&self, entry: LiveEntryId, offset: f64) {
        let mut state = self.state.lock();
        state.seeks.push((entry, offset));
        state.position = Some(Position { entry, offset });
    }

    fn set_playing(&self, playing: bool) {
        self.state.lock().playing = playing;
    }

    fn encoder_get_buffer(&self) -> Option<EncoderOutput> {
        self.state.lock().output.pop_front()
    }

    fn encoder_attach(&self) -> impl Future<Output = Result<()>> + Send {
        {
            let mut state = self.state.lock();
            state.attach_calls += 1;
            state.attached = true;
        }
        async {
            tokio::task::yield_now().await;
            Ok(())
        }
    }

    fn encoder_detach(&self) -> impl Future<Output = Result<()>> + Send {
        {
            let mut state = self.state.lock();
            state.detach_calls += 1;
            state.attached = false;
        }
        async {
            tokio::task::yield_now().await;
            Ok(())
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
