//! Library ingestion through the deduplicating task queue.
//!
//! Scans are keyed by absolute path, so a directory walk and a file-watch
//! event for the same file share one scan.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cadence_core::{LibraryTrack, MemoryLibrary, Result, TrackKey};
use cadence_tasks::{Completion, DedupTaskQueue, TaskQueueOptions, TaskResult};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Reads tags from an audio file.
pub trait TrackScanner: Send + Sync + 'static {
    fn scan(&self, path: &Path) -> Result<LibraryTrack>;
}

type ScanQueue = DedupTaskQueue<PathBuf, (), LibraryTrack>;

/// Feeds scanned files into the in-memory library.
#[derive(Clone)]
pub struct LibraryIngest {
    tasks: ScanQueue,
    library: Arc<MemoryLibrary>,
}

impl LibraryIngest {
    /// Scans run on tokio's blocking pool, so this needs a runtime.
    pub fn new(
        scanner: Arc<dyn TrackScanner>,
        library: Arc<MemoryLibrary>,
        options: TaskQueueOptions,
    ) -> Self {
        let sink = Arc::clone(&library);
        let tasks = DedupTaskQueue::new(
            options,
            move |path: PathBuf, (), done: Completion<PathBuf, (), LibraryTrack>| {
                let scanner = Arc::clone(&scanner);
                let library = Arc::clone(&sink);
                tokio::task::spawn_blocking(move || match scanner.scan(&path) {
                    Ok(track) => {
                        debug!("Scanned {}", path.display());
                        library.upsert(track.clone());
                        done.succeed(track);
                    }
                    Err(e) => {
                        warn!("Failed to scan {}: {e}", path.display());
                        done.fail(e);
                    }
                });
            },
        );
        Self { tasks, library }
    }

    pub fn library(&self) -> &Arc<MemoryLibrary> {
        &self.library
    }

    /// Queue a scan of `path`. Joins any scan already queued for it.
    pub fn submit(&self, path: &Path) {
        self.tasks.submit(absolute(path), (), None);
    }

    /// Scan `path` and wait for the result. The scan is queued before the
    /// returned future is first polled.
    pub fn scan(&self, path: &Path) -> impl Future<Output = TaskResult<LibraryTrack>> {
        self.tasks.submit_and_wait(absolute(path), ())
    }

    /// Scan `path` again even if a scan of it is already running, e.g.
    /// because the file changed mid-scan.
    pub fn rescan(&self, path: &Path) {
        self.tasks.requeue(absolute(path), (), None);
    }

    /// Drop `path` from the library. Returns the removed track's key.
    pub fn forget(&self, path: &Path) -> Option<TrackKey> {
        let key = self.library.key_for_path(&absolute(path))?;
        self.library.remove(&key).map(|track| track.key)
    }

    /// Drop every queued scan.
    pub fn clear(&self) {
        self.tasks.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.pending_count()
    }

    pub fn running_count(&self) -> usize {
        self.tasks.running_count()
    }

    /// Hold new scans back and wait for the running ones to finish.
    ///
    /// Scanning resumes when the returned guard is dropped.
    pub async fn pause_for_exclusive(&self) -> ExclusiveGuard {
        self.tasks.pause(true);
        let (tx, rx) = oneshot::channel();
        self.tasks.await_all_running(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
        info!("Library scans paused for exclusive access");
        ExclusiveGuard {
            tasks: self.tasks.clone(),
        }
    }
}

/// Keeps library scans paused while alive.
pub struct ExclusiveGuard {
    tasks: ScanQueue,
}

impl Drop for ExclusiveGuard {
    fn drop(&mut self) {
        debug!("Resuming library scans");
        self.tasks.pause(false);
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use cadence_core::{Error, Library};
    use cadence_tasks::TaskError;
    use parking_lot::{Condvar, Mutex};
    use std::collections::HashMap;

    /// Scanner that counts calls and can be held at a gate.
    #[derive(Default)]
    struct GatedScanner {
        calls: Mutex<HashMap<PathBuf, usize>>,
        closed: Mutex<bool>,
        gate: Condvar,
    }

    impl GatedScanner {
        fn close(&self) {
            *self.closed.lock() = true;
        }

        fn open(&self) {
            *self.closed.lock() = false;
            self.gate.notify_all();
        }

        fn calls(&self, path: &Path) -> usize {
            self.calls.lock().get(path).copied().unwrap_or(0)
        }
    }

    impl TrackScanner for GatedScanner {
        fn scan(&self, path: &Path) -> Result<LibraryTrack> {
            *self.calls.lock().entry(path.to_path_buf()).or_default() += 1;
            let mut closed = self.closed.lock();
            while *closed {
                self.gate.wait(&mut closed);
            }
            drop(closed);
            if path.extension().is_some_and(|ext| ext == "txt") {
                return Err(Error::file_open(path.display().to_string(), "not audio"));
            }
            let stem = path.file_stem().unwrap().to_string_lossy().to_string();
            Ok(LibraryTrack::new(stem, path))
        }
    }

    fn ingest(scanner: &Arc<GatedScanner>) -> LibraryIngest {
        LibraryIngest::new(
            scanner.clone(),
            Arc::new(MemoryLibrary::new()),
            TaskQueueOptions::with_max_concurrency(2),
        )
    }

    #[tokio::test]
    async fn test_scan_upserts_into_library() {
        let scanner = Arc::new(GatedScanner::default());
        let ingest = ingest(&scanner);

        let track = ingest.scan(Path::new("/music/song.flac")).await.unwrap();
        assert_eq!(track.key, "song");
        assert!(ingest.library().contains("song"));

        let err = ingest.scan(Path::new("/music/notes.txt")).await.unwrap_err();
        assert!(matches!(err, TaskError::Failed(_)));
        assert_eq!(ingest.library().len(), 1);

        assert_eq!(ingest.forget(Path::new("/music/song.flac")), Some("song".to_string()));
        assert!(ingest.library().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_paths_scan_once() {
        let scanner = Arc::new(GatedScanner::default());
        let ingest = ingest(&scanner);
        let path = Path::new("/music/a.flac");

        scanner.close();
        let first = ingest.scan(path);
        let second = ingest.scan(path);
        ingest.submit(path);
        assert_eq!(ingest.running_count(), 1);
        assert_eq!(ingest.pending_count(), 0);
        scanner.open();

        assert_eq!(first.await.unwrap().key, "a");
        assert_eq!(second.await.unwrap().key, "a");
        assert_eq!(scanner.calls(path), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pause_for_exclusive_waits_for_running_scans() {
        let scanner = Arc::new(GatedScanner::default());
        let ingest = ingest(&scanner);

        scanner.close();
        ingest.submit(Path::new("/music/a.flac"));
        assert_eq!(ingest.running_count(), 1);

        let exclusive = tokio::spawn({
            let ingest = ingest.clone();
            async move { ingest.pause_for_exclusive().await }
        });
        while !ingest.tasks.is_paused() {
            tokio::task::yield_now().await;
        }
        ingest.submit(Path::new("/music/b.flac"));
        assert_eq!(ingest.pending_count(), 1);

        scanner.open();
        let guard = exclusive.await.unwrap();
        assert!(ingest.library().contains("a"));
        assert_eq!(ingest.pending_count(), 1);
        assert_eq!(scanner.calls(Path::new("/music/b.flac")), 0);

        drop(guard);
        let track = ingest.scan(Path::new("/music/b.flac")).await.unwrap();
        assert_eq!(track.key, "b");
    }
}
