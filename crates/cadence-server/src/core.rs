//! Component wiring.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use cadence_core::{EventBus, MemoryLibrary, PlayerEvent, TrackKey};
use cadence_player::{DecodeEngine, DecodeWindowSync, StreamBufferManager};
use cadence_queue::{PlaylistStore, QueueStore, SharedQueue};
use cadence_store::{KvStore, SqliteStore};
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::ingest::{LibraryIngest, TrackScanner};

/// Playlists shared between front ends.
pub type SharedPlaylists = Arc<Mutex<PlaylistStore>>;

/// The running server: persistent queue and playlists, the decode window,
/// the stream fan-out and library ingest.
pub struct Core<E: DecodeEngine> {
    config: Config,
    library: Arc<MemoryLibrary>,
    queue: SharedQueue,
    playlists: SharedPlaylists,
    stream: StreamBufferManager<E>,
    ingest: LibraryIngest,
    events: EventBus<PlayerEvent>,
    stop_window: oneshot::Sender<()>,
    window: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl<E: DecodeEngine> Core<E> {
    /// Open the configured store and start every component.
    ///
    /// `library` must already hold the indexed tracks; queue and playlist
    /// items referencing unknown tracks are dropped while loading.
    pub fn start(
        config: Config,
        engine: Arc<E>,
        library: Arc<MemoryLibrary>,
        scanner: Arc<dyn TrackScanner>,
    ) -> Result<Self> {
        let store = match &config.store.path {
            Some(path) => SqliteStore::open(path.clone()),
            None => SqliteStore::new(),
        }
        .context("Failed to open store")?;
        Self::start_with_store(config, engine, library, scanner, Arc::new(store))
    }

    /// Start every component on top of `store`. Must run inside a tokio
    /// runtime.
    pub fn start_with_store(
        config: Config,
        engine: Arc<E>,
        library: Arc<MemoryLibrary>,
        scanner: Arc<dyn TrackScanner>,
        store: Arc<dyn KvStore>,
    ) -> Result<Self> {
        let queue = QueueStore::load(Arc::clone(&store), library.clone())
            .context("Failed to load play queue")?;
        let playlists = PlaylistStore::load(Arc::clone(&store), library.clone())
            .context("Failed to load playlists")?;
        info!(
            "Loaded {} queue items and {} playlists",
            queue.len(),
            playlists.list().len()
        );

        let queue: SharedQueue = Arc::new(Mutex::new(queue));
        let playlists = Arc::new(Mutex::new(playlists));
        let events = EventBus::default();

        let stream =
            StreamBufferManager::new(Arc::clone(&engine), config.stream_config(), events.clone());
        let window = DecodeWindowSync::new(
            engine,
            queue.clone(),
            library.clone(),
            config.window_config(),
            events.clone(),
        )
        .with_stream(stream.clone());

        let (stop_window, shutdown) = oneshot::channel();
        let window = tokio::spawn(window.run(shutdown));
        let workers = vec![
            tokio::spawn(stream.clone().run()),
            tokio::spawn(forward_pause_requests(events.subscribe(), queue.clone())),
        ];

        let ingest = LibraryIngest::new(scanner, library.clone(), config.task_options());

        Ok(Self {
            config,
            library,
            queue,
            playlists,
            stream,
            ingest,
            events,
            stop_window,
            window,
            workers,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn library(&self) -> &Arc<MemoryLibrary> {
        &self.library
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    pub fn playlists(&self) -> &SharedPlaylists {
        &self.playlists
    }

    pub fn stream(&self) -> &StreamBufferManager<E> {
        &self.stream
    }

    pub fn ingest(&self) -> &LibraryIngest {
        &self.ingest
    }

    pub fn events(&self) -> &EventBus<PlayerEvent> {
        &self.events
    }

    /// Delete tracks from the library along with every queue and playlist
    /// item referencing them.
    pub fn remove_tracks(&self, keys: &HashSet<TrackKey>) {
        for key in keys {
            self.library.remove(key);
        }
        self.queue.lock().remove_tracks(keys);
        self.playlists.lock().remove_tracks(keys);
    }

    /// Stop the background workers. The decode window is drained first so
    /// the engine is left with no live entries or open files.
    pub async fn shutdown(self) {
        let _ = self.stop_window.send(());
        if let Err(e) = self.window.await {
            warn!("Decode window worker failed: {e}");
        }
        for worker in &self.workers {
            worker.abort();
        }
        info!("Cadence stopped");
    }
}

/// Pause the queue when the stream asks for it.
async fn forward_pause_requests(mut events: broadcast::Receiver<PlayerEvent>, queue: SharedQueue) {
    loop {
        match events.recv().await {
            Ok(PlayerEvent::PauseRequested) => {
                debug!("Pausing playback with no listeners left");
                queue.lock().pause();
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
