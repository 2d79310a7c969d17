//! Decode window synchronisation.
//!
//! Keeps files opened for the items around the current queue item and
//! mirrors the current item plus its open successors into the engine's
//! live playlist. Runs on every queue change, open completion and engine
//! playhead move; each run reads a fresh queue snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cadence_core::{
    EventBus, Library, LibraryTrack, PlaybackState, PlayerEvent, QueueItem, Result, TrackKey,
};
use cadence_queue::SharedQueue;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::engine::{DecodeEngine, EngineEvent, FileHandle, LiveEntryId};
use crate::gain::{gain_and_peak, GainConfig};
use crate::stream::StreamBufferManager;

/// Window tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    /// Items kept open before the current one.
    pub predecessors: usize,
    /// Items kept open after the current one.
    pub successors: usize,
    pub gain: GainConfig,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            predecessors: 1,
            successors: 2,
            gain: GainConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    /// Open in flight. `deleted` is set once the item left the window; the
    /// completion then closes the file instead of keeping it.
    Opening { deleted: bool },
    Open {
        file: FileHandle,
        live: Option<LiveEntryId>,
    },
    /// Open failed; skipped until the item leaves the window.
    Failed,
}

#[derive(Debug)]
struct WindowEntry {
    track_key: TrackKey,
    generation: u64,
    state: EntryState,
}

#[derive(Debug)]
struct OpenDone {
    item: Uuid,
    generation: u64,
    result: Result<FileHandle>,
}

struct Snapshot {
    items: Vec<QueueItem>,
    current_index: Option<usize>,
    seek: Option<f64>,
    state: PlaybackState,
}

/// Reconciles the queue with the engine's opened files and live playlist.
pub struct DecodeWindowSync<E: DecodeEngine> {
    engine: Arc<E>,
    queue: SharedQueue,
    library: Arc<dyn Library>,
    stream: Option<StreamBufferManager<E>>,
    config: WindowConfig,
    events: EventBus<PlayerEvent>,
    entries: HashMap<Uuid, WindowEntry>,
    next_generation: u64,
    open_tx: mpsc::UnboundedSender<OpenDone>,
    open_rx: mpsc::UnboundedReceiver<OpenDone>,
    /// Set while a wanted item is still opening, so an end-of-playlist
    /// report from the engine is premature.
    distrust_end: bool,
    last_current: Option<Uuid>,
    applied_playing: Option<bool>,
}

impl<E: DecodeEngine> DecodeWindowSync<E> {
    pub fn new(
        engine: Arc<E>,
        queue: SharedQueue,
        library: Arc<dyn Library>,
        config: WindowConfig,
        events: EventBus<PlayerEvent>,
    ) -> Self {
        let (open_tx, open_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            queue,
            library,
            stream: None,
            config,
            events,
            entries: HashMap::new(),
            next_generation: 0,
            open_tx,
            open_rx,
            distrust_end: false,
            last_current: None,
            applied_playing: None,
        }
    }

    /// Clear `stream`'s buffers whenever a seek is issued.
    #[must_use]
    pub fn with_stream(mut self, stream: StreamBufferManager<E>) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Number of items with an open file.
    pub fn open_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry.state, EntryState::Open { .. }))
            .count()
    }

    pub fn has_pending_opens(&self) -> bool {
        self.entries
            .values()
            .any(|entry| matches!(entry.state, EntryState::Opening { .. }))
    }

    /// True while an end-of-playlist report would be ignored.
    pub const fn distrusts_end(&self) -> bool {
        self.distrust_end
    }

    /// Bring the window and the live playlist in line with the queue.
    pub fn sync(&mut self) {
        let snapshot = self.snapshot();
        let current = snapshot.current_index.map(|index| snapshot.items[index].id);
        if current != self.last_current {
            self.last_current = current;
            self.events
                .publish(PlayerEvent::CurrentTrackChanged { item: current });
        }

        let desired: Vec<usize> = match snapshot.current_index {
            Some(index) => {
                let first = index.saturating_sub(self.config.predecessors);
                let last = (index + self.config.successors).min(snapshot.items.len() - 1);
                (first..=last).collect()
            }
            None => Vec::new(),
        };
        let desired_ids: HashSet<Uuid> = desired
            .iter()
            .map(|index| snapshot.items[*index].id)
            .collect();

        let stale: Vec<Uuid> = self
            .entries
            .keys()
            .filter(|id| !desired_ids.contains(id))
            .copied()
            .collect();
        for id in stale {
            self.retire(id);
        }

        for index in &desired {
            let item = &snapshot.items[*index];
            if let Some(entry) = self.entries.get_mut(&item.id) {
                if let EntryState::Opening { deleted } = &mut entry.state {
                    *deleted = false;
                }
                continue;
            }
            self.begin_open(item);
        }

        self.sync_live(&snapshot);
        self.apply_seek(&snapshot);

        let playing = snapshot.state == PlaybackState::Playing;
        if self.applied_playing != Some(playing) {
            self.engine.set_playing(playing);
            self.applied_playing = Some(playing);
        }
    }

    /// React to the engine moving its playhead.
    pub fn on_now_playing(&mut self) {
        match self.engine.position() {
            Some(position) => {
                let advanced = self.entries.iter().find_map(|(id, entry)| match entry.state {
                    EntryState::Open {
                        live: Some(live), ..
                    } if live == position.entry => Some(*id),
                    _ => None,
                });
                if let Some(item) = advanced {
                    self.queue.lock().track_advanced(item);
                }
            }
            None if self.distrust_end => {
                debug!("Ignoring end of playlist while the window is still filling");
            }
            None => {
                let finished = {
                    let mut queue = self.queue.lock();
                    if queue.current().is_none() {
                        return;
                    }
                    queue.end_of_queue();
                    queue.current().is_none()
                };
                if finished {
                    info!("Playback finished");
                    self.events.publish(PlayerEvent::PlaybackFinished);
                }
            }
        }
        self.sync();
    }

    /// Wait for every in-flight open to complete, syncing after each.
    pub async fn settle(&mut self) {
        while self.has_pending_opens() {
            let Some(done) = self.open_rx.recv().await else {
                break;
            };
            if self.on_open_complete(done) {
                self.sync();
            }
        }
    }

    /// Remove every live entry and close every file.
    pub fn close_all(&mut self) {
        let ids: Vec<Uuid> = self.entries.keys().copied().collect();
        for id in ids {
            self.retire(id);
        }
    }

    /// Sync on every queue change, open completion and playhead move until
    /// `shutdown` fires or its sender is dropped.
    ///
    /// On the way out every live entry is removed and every file closed,
    /// including files whose open was still in flight.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut queue_rx = self.queue.lock().events().subscribe();
        let mut engine_rx = self.engine.subscribe();
        self.sync();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = queue_rx.recv() => match event {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => self.sync(),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(done) = self.open_rx.recv() => {
                    if self.on_open_complete(done) {
                        self.sync();
                    }
                }
                event = engine_rx.recv() => match event {
                    Ok(EngineEvent::NowPlaying) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        self.on_now_playing();
                    }
                    Ok(EngineEvent::BufferReady) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        self.close_all();
        self.settle().await;
        debug!("Decode window stopped");
    }

    fn snapshot(&self) -> Snapshot {
        let queue = self.queue.lock();
        Snapshot {
            items: queue.ordered(),
            current_index: queue.current_index(),
            seek: queue.seek_request(),
            state: queue.state(),
        }
    }

    fn begin_open(&mut self, item: &QueueItem) {
        self.next_generation += 1;
        let generation = self.next_generation;

        let Some(track) = self.library.track(&item.track_key) else {
            warn!("Queue item {} references unknown track {}", item.id, item.track_key);
            self.entries.insert(
                item.id,
                WindowEntry {
                    track_key: item.track_key.clone(),
                    generation,
                    state: EntryState::Failed,
                },
            );
            return;
        };

        trace!("Opening {} for item {}", track.path.display(), item.id);
        self.entries.insert(
            item.id,
            WindowEntry {
                track_key: item.track_key.clone(),
                generation,
                state: EntryState::Opening { deleted: false },
            },
        );

        let engine = Arc::clone(&self.engine);
        let tx = self.open_tx.clone();
        let item = item.id;
        tokio::spawn(async move {
            let result = engine.open_file(&track.path).await;
            let _ = tx.send(OpenDone {
                item,
                generation,
                result,
            });
        });
    }

    /// Record an open result. Returns true if the window changed.
    fn on_open_complete(&mut self, done: OpenDone) -> bool {
        let OpenDone {
            item,
            generation,
            result,
        } = done;

        let Some(entry) = self
            .entries
            .get_mut(&item)
            .filter(|entry| entry.generation == generation)
        else {
            if let Ok(file) = result {
                self.engine.close_file(file);
            }
            return false;
        };

        match (entry.state, result) {
            (EntryState::Opening { deleted: true }, result) => {
                debug!("Discarding open of item {item} that left the window");
                if let Ok(file) = result {
                    self.engine.close_file(file);
                }
                self.entries.remove(&item);
                false
            }
            (EntryState::Opening { deleted: false }, Ok(file)) => {
                entry.state = EntryState::Open { file, live: None };
                true
            }
            (EntryState::Opening { deleted: false }, Err(e)) => {
                warn!("Failed to open track {} for item {item}: {e}", entry.track_key);
                entry.state = EntryState::Failed;
                true
            }
            (_, result) => {
                if let Ok(file) = result {
                    self.engine.close_file(file);
                }
                false
            }
        }
    }

    /// Drop an item from the window.
    fn retire(&mut self, id: Uuid) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        match entry.state {
            EntryState::Opening { .. } => {
                entry.state = EntryState::Opening { deleted: true };
            }
            EntryState::Open { file, live } => {
                if let Some(live) = live {
                    self.engine.playlist_remove(live);
                }
                self.engine.close_file(file);
                self.entries.remove(&id);
            }
            EntryState::Failed => {
                self.entries.remove(&id);
            }
        }
    }

    /// Walk the live playlist in lock-step with the expected items from the
    /// current one onwards.
    fn sync_live(&mut self, snapshot: &Snapshot) {
        self.distrust_end = false;

        let mut expected: Vec<(Uuid, f64, f64)> = Vec::new();
        if let Some(current) = snapshot.current_index {
            let last = (current + self.config.successors).min(snapshot.items.len() - 1);
            let track_at = |index: Option<usize>| -> Option<LibraryTrack> {
                index
                    .and_then(|index| snapshot.items.get(index))
                    .and_then(|item| self.library.track(&item.track_key))
            };
            for index in current..=last {
                let item = &snapshot.items[index];
                match self.entries.get(&item.id).map(|entry| entry.state) {
                    Some(EntryState::Open { .. }) => {}
                    Some(EntryState::Failed) => continue,
                    _ => {
                        self.distrust_end = true;
                        break;
                    }
                }
                let (gain, peak) = match track_at(Some(index)) {
                    Some(track) => gain_and_peak(
                        &self.config.gain,
                        track_at(index.checked_sub(1)).as_ref(),
                        &track,
                        track_at(Some(index + 1)).as_ref(),
                    ),
                    None => (self.config.gain.preamp * self.config.gain.default_gain, 1.0),
                };
                expected.push((item.id, gain, peak));
            }
        }

        let owners: HashMap<LiveEntryId, Uuid> = self
            .entries
            .iter()
            .filter_map(|(id, entry)| match entry.state {
                EntryState::Open {
                    live: Some(live), ..
                } => Some((live, *id)),
                _ => None,
            })
            .collect();

        let mut matched = 0;
        for live in self.engine.playlist() {
            let owner = owners.get(&live.id).copied();
            if let Some(&(item, gain, peak)) = expected.get(matched) {
                if owner == Some(item) {
                    self.engine.playlist_set_gain(live.id, gain, peak);
                    matched += 1;
                    continue;
                }
            }
            trace!("Removing live entry {:?}", live.id);
            self.engine.playlist_remove(live.id);
            if let Some(EntryState::Open { live, .. }) = owner
                .and_then(|owner| self.entries.get_mut(&owner))
                .map(|entry| &mut entry.state)
            {
                *live = None;
            }
        }

        for &(item, gain, peak) in &expected[matched..] {
            let Some(entry) = self.entries.get_mut(&item) else {
                continue;
            };
            if let EntryState::Open { file, live } = &mut entry.state {
                match self.engine.playlist_insert(*file, gain, peak, None) {
                    Ok(id) => *live = Some(id),
                    Err(e) => warn!("Failed to insert item {item} into live playlist: {e}"),
                }
            }
        }
    }

    /// Issue the pending seek once the current item is live.
    fn apply_seek(&mut self, snapshot: &Snapshot) {
        let (Some(index), Some(position)) = (snapshot.current_index, snapshot.seek) else {
            return;
        };
        let item = snapshot.items[index].id;
        let Some(EntryState::Open {
            live: Some(live), ..
        }) = self.entries.get(&item).map(|entry| entry.state)
        else {
            return;
        };

        {
            let mut queue = self.queue.lock();
            if queue.current() != Some(item) || queue.seek_request() != Some(position) {
                return;
            }
            queue.clear_seek_request();
        }

        debug!("Seeking item {item} to {position:.2}s");
        self.engine.seek(live, position);
        if let Some(stream) = &self.stream {
            stream.seek_clear();
        }
        self.events.publish(PlayerEvent::Seeked { item, position });
    }
}
