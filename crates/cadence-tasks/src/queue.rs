//! Deduplicating task queue implementation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::error::{TaskError, TaskResult};

/// Capacity of the task event channel.
const EVENT_CAPACITY: usize = 1024;

/// Identity that units of work are deduplicated by.
pub trait TaskId: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> TaskId for T {}

/// Input handed to the processor.
pub trait Payload: Send + 'static {}
impl<T: Send + 'static> Payload for T {}

/// Output shared by every waiter of a unit.
pub trait Output: Clone + Send + 'static {}
impl<T: Clone + Send + 'static> Output for T {}

/// Callback invoked once with a unit's outcome.
pub type Waiter<O> = Box<dyn FnOnce(TaskResult<O>) + Send>;

type Processor<I, P, O> = Arc<dyn Fn(I, P, Completion<I, P, O>) + Send + Sync>;

/// Events reported by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent<I> {
    /// A unit finished successfully.
    Finished { id: I },
    /// A unit failed or was removed before it started.
    Failed { id: I, error: TaskError },
    /// A unit signalled completion a second time. This means the processor
    /// lost track of its resources and the host should decide whether to
    /// continue degraded.
    CompletedTwice { id: I },
}

/// What `clear` does with units that are already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClearPolicy {
    /// Only fail pending units; running units finish normally.
    #[default]
    PendingOnly,
    /// Also fail the waiters of running units and free their slots. The
    /// eventual completion signal of an interrupted unit is discarded.
    PendingAndRunning,
}

/// Queue tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskQueueOptions {
    pub max_concurrency: usize,
    pub clear_policy: ClearPolicy,
}

impl TaskQueueOptions {
    pub fn with_max_concurrency(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            ..Self::default()
        }
    }
}

impl Default for TaskQueueOptions {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            clear_policy: ClearPolicy::default(),
        }
    }
}

struct PendingUnit<I, P, O> {
    id: I,
    payload: P,
    seq: u64,
    waiters: Vec<Waiter<O>>,
}

struct RunningUnit<O> {
    seq: u64,
    waiters: Vec<Waiter<O>>,
}

struct IdleWaiter {
    remaining: HashSet<u64>,
    callback: Box<dyn FnOnce() + Send>,
}

struct State<I, P, O> {
    pending: VecDeque<PendingUnit<I, P, O>>,
    running: HashMap<I, RunningUnit<O>>,
    /// Sequence numbers of running units cut loose by `clear`.
    interrupted: HashSet<u64>,
    idle_waiters: Vec<IdleWaiter>,
    paused: bool,
    next_seq: u64,
}

impl<I: TaskId, P, O> State<I, P, O> {
    fn allocate_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Marks `seq` as no longer running and returns idle waiters that are
    /// now satisfied.
    fn settle_idle_waiters(&mut self, seq: u64) -> Vec<IdleWaiter> {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.idle_waiters)
            .into_iter()
            .map(|mut waiter| {
                waiter.remaining.remove(&seq);
                waiter
            })
            .partition(|waiter| waiter.remaining.is_empty());
        self.idle_waiters = waiting;
        ready
    }
}

struct Shared<I: TaskId, P: Payload, O: Output> {
    state: Mutex<State<I, P, O>>,
    processor: Processor<I, P, O>,
    options: TaskQueueOptions,
    events_tx: Sender<TaskEvent<I>>,
    events_rx: Receiver<TaskEvent<I>>,
}

impl<I: TaskId, P: Payload, O: Output> Shared<I, P, O> {
    fn emit(&self, event: TaskEvent<I>) {
        if let Err(TrySendError::Full(event)) = self.events_tx.try_send(event) {
            warn!("Task event channel full, dropping {:?}", event);
        }
    }
}

/// Handle a processor uses to signal that its unit of work is done.
///
/// Cloneable so it can travel into callbacks, but only the first signal
/// counts. A second signal is reported as [`TaskEvent::CompletedTwice`].
/// Dropping every clone without signalling fails the unit with
/// [`TaskError::Abandoned`].
pub struct Completion<I: TaskId, P: Payload, O: Output> {
    inner: Arc<CompletionInner<I, P, O>>,
}

impl<I: TaskId, P: Payload, O: Output> Clone for Completion<I, P, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CompletionInner<I: TaskId, P: Payload, O: Output> {
    queue: Weak<Shared<I, P, O>>,
    id: I,
    seq: u64,
    signalled: AtomicBool,
}

impl<I: TaskId, P: Payload, O: Output> Completion<I, P, O> {
    pub fn id(&self) -> &I {
        &self.inner.id
    }

    /// Signal the unit's outcome.
    pub fn complete(&self, result: TaskResult<O>) {
        let inner = &self.inner;
        if inner.signalled.swap(true, Ordering::AcqRel) {
            error!("Task {:?} signalled completion more than once", inner.id);
            if let Some(shared) = inner.queue.upgrade() {
                shared.emit(TaskEvent::CompletedTwice {
                    id: inner.id.clone(),
                });
            }
            return;
        }
        if let Some(shared) = inner.queue.upgrade() {
            DedupTaskQueue { shared }.finish(inner.id.clone(), inner.seq, result);
        }
    }

    pub fn succeed(&self, output: O) {
        self.complete(Ok(output));
    }

    pub fn fail(&self, reason: impl std::fmt::Display) {
        self.complete(Err(TaskError::failed(reason)));
    }
}

impl<I: TaskId, P: Payload, O: Output> Drop for CompletionInner<I, P, O> {
    fn drop(&mut self) {
        if *self.signalled.get_mut() {
            return;
        }
        *self.signalled.get_mut() = true;
        if let Some(shared) = self.queue.upgrade() {
            warn!("Task {:?} dropped without signalling completion", self.id);
            DedupTaskQueue { shared }.finish(self.id.clone(), self.seq, Err(TaskError::Abandoned));
        }
    }
}

/// Bounded-concurrency task runner that deduplicates by identity.
pub struct DedupTaskQueue<I: TaskId, P: Payload, O: Output> {
    shared: Arc<Shared<I, P, O>>,
}

impl<I: TaskId, P: Payload, O: Output> Clone for DedupTaskQueue<I, P, O> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<I: TaskId, P: Payload, O: Output> DedupTaskQueue<I, P, O> {
    /// Create a queue that hands each started unit to `processor`.
    ///
    /// The processor must eventually signal the [`Completion`] it receives,
    /// typically from a spawned task.
    pub fn new<F>(options: TaskQueueOptions, processor: F) -> Self
    where
        F: Fn(I, P, Completion<I, P, O>) + Send + Sync + 'static,
    {
        let (events_tx, events_rx) = bounded(EVENT_CAPACITY);
        let options = TaskQueueOptions {
            max_concurrency: options.max_concurrency.max(1),
            ..options
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    pending: VecDeque::new(),
                    running: HashMap::new(),
                    interrupted: HashSet::new(),
                    idle_waiters: Vec::new(),
                    paused: false,
                    next_seq: 0,
                }),
                processor: Arc::new(processor),
                options,
                events_tx,
                events_rx,
            }),
        }
    }

    pub fn options(&self) -> TaskQueueOptions {
        self.shared.options
    }

    /// Receiver for queue events. Intended for a single consumer.
    pub fn events(&self) -> Receiver<TaskEvent<I>> {
        self.shared.events_rx.clone()
    }

    /// Submit a unit of work.
    ///
    /// If `id` is already pending or running, `on_complete` joins that unit
    /// and `payload` is discarded.
    pub fn submit(&self, id: I, payload: P, on_complete: Option<Waiter<O>>) {
        {
            let mut state = self.shared.state.lock();
            if let Some(unit) = state.pending.iter_mut().find(|unit| unit.id == id) {
                trace!("Task {:?} already pending, attaching waiter", id);
                unit.waiters.extend(on_complete);
                return;
            }
            if let Some(unit) = state.running.get_mut(&id) {
                trace!("Task {:?} already running, attaching waiter", id);
                unit.waiters.extend(on_complete);
                return;
            }
            let seq = state.allocate_seq();
            state.pending.push_back(PendingUnit {
                id,
                payload,
                seq,
                waiters: on_complete.into_iter().collect(),
            });
        }
        self.flush();
    }

    /// Submit a unit that must run again even if `id` is currently running,
    /// for example because the file changed mid-scan.
    ///
    /// A pending unit for `id` is still joined. A new unit for a running
    /// `id` waits until the running one finishes.
    pub fn requeue(&self, id: I, payload: P, on_complete: Option<Waiter<O>>) {
        {
            let mut state = self.shared.state.lock();
            if let Some(unit) = state.pending.iter_mut().find(|unit| unit.id == id) {
                unit.waiters.extend(on_complete);
                return;
            }
            let seq = state.allocate_seq();
            state.pending.push_back(PendingUnit {
                id,
                payload,
                seq,
                waiters: on_complete.into_iter().collect(),
            });
        }
        self.flush();
    }

    /// Submit and await the unit's outcome.
    pub fn submit_and_wait(&self, id: I, payload: P) -> impl Future<Output = TaskResult<O>> {
        let (tx, rx) = oneshot::channel();
        self.submit(
            id,
            payload,
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        );
        async move { rx.await.unwrap_or(Err(TaskError::Abandoned)) }
    }

    /// True if `id` is pending or running.
    pub fn is_queued(&self, id: &I) -> bool {
        let state = self.shared.state.lock();
        state.running.contains_key(id) || state.pending.iter().any(|unit| &unit.id == id)
    }

    /// Register a waiter for `id`. Invoked immediately with
    /// [`TaskError::NotQueued`] if `id` is not tracked.
    pub fn await_completion(&self, id: &I, on_complete: Waiter<O>) {
        let on_complete = {
            let mut state = self.shared.state.lock();
            if let Some(unit) = state.pending.iter_mut().find(|unit| &unit.id == id) {
                unit.waiters.push(on_complete);
                return;
            }
            if let Some(unit) = state.running.get_mut(id) {
                unit.waiters.push(on_complete);
                return;
            }
            on_complete
        };
        on_complete(Err(TaskError::NotQueued));
    }

    /// Await the outcome of `id`.
    pub fn wait(&self, id: &I) -> impl Future<Output = TaskResult<O>> {
        let (tx, rx) = oneshot::channel();
        self.await_completion(
            id,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        async move { rx.await.unwrap_or(Err(TaskError::Abandoned)) }
    }

    /// Call `on_idle` once every unit running right now has finished.
    /// Units started later are not waited for.
    pub fn await_all_running(&self, on_idle: impl FnOnce() + Send + 'static) {
        let on_idle: Box<dyn FnOnce() + Send> = {
            let mut state = self.shared.state.lock();
            let remaining: HashSet<u64> = state.running.values().map(|unit| unit.seq).collect();
            if !remaining.is_empty() {
                state.idle_waiters.push(IdleWaiter {
                    remaining,
                    callback: Box::new(on_idle),
                });
                return;
            }
            Box::new(on_idle)
        };
        on_idle();
    }

    /// Fail every pending unit with [`TaskError::RemovedFromQueue`].
    ///
    /// Running units are left alone unless the queue was built with
    /// [`ClearPolicy::PendingAndRunning`].
    pub fn clear(&self) {
        let (removed, interrupted, ready) = {
            let mut state = self.shared.state.lock();
            let removed: Vec<(I, Vec<Waiter<O>>)> = state
                .pending
                .drain(..)
                .map(|unit| (unit.id, unit.waiters))
                .collect();

            let mut interrupted = Vec::new();
            let mut ready = Vec::new();
            if self.shared.options.clear_policy == ClearPolicy::PendingAndRunning {
                let running: Vec<(I, RunningUnit<O>)> = state.running.drain().collect();
                for (id, unit) in running {
                    state.interrupted.insert(unit.seq);
                    ready.extend(state.settle_idle_waiters(unit.seq));
                    interrupted.push((id, unit.waiters));
                }
            }
            (removed, interrupted, ready)
        };

        debug!(
            "Cleared task queue: {} pending, {} running interrupted",
            removed.len(),
            interrupted.len()
        );

        for (id, waiters) in removed.into_iter().chain(interrupted) {
            self.shared.emit(TaskEvent::Failed {
                id,
                error: TaskError::RemovedFromQueue,
            });
            for waiter in waiters {
                waiter(Err(TaskError::RemovedFromQueue));
            }
        }
        for waiter in ready {
            (waiter.callback)();
        }
    }

    /// Stop (or resume) starting new units. Running units are unaffected.
    pub fn pause(&self, paused: bool) {
        self.shared.state.lock().paused = paused;
        if !paused {
            self.flush();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    pub fn running_count(&self) -> usize {
        self.shared.state.lock().running.len()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Start pending units until the concurrency limit is reached. Units
    /// whose id is still running are deferred to the back of the queue.
    fn flush(&self) {
        let started = {
            let mut state = self.shared.state.lock();
            if state.paused {
                return;
            }
            let mut started = Vec::new();
            let mut deferred = Vec::new();
            while state.running.len() < self.shared.options.max_concurrency {
                let Some(unit) = state.pending.pop_front() else {
                    break;
                };
                if state.running.contains_key(&unit.id) {
                    deferred.push(unit);
                    continue;
                }
                state.running.insert(
                    unit.id.clone(),
                    RunningUnit {
                        seq: unit.seq,
                        waiters: unit.waiters,
                    },
                );
                started.push((unit.id, unit.payload, unit.seq));
            }
            state.pending.extend(deferred);
            started
        };

        for (id, payload, seq) in started {
            debug!("Starting task {:?}", id);
            let completion = Completion {
                inner: Arc::new(CompletionInner {
                    queue: Arc::downgrade(&self.shared),
                    id: id.clone(),
                    seq,
                    signalled: AtomicBool::new(false),
                }),
            };
            (self.shared.processor)(id, payload, completion);
        }
    }

    fn finish(&self, id: I, seq: u64, result: TaskResult<O>) {
        let (waiters, ready) = {
            let mut state = self.shared.state.lock();
            if state.interrupted.remove(&seq) {
                debug!("Discarding completion of interrupted task {:?}", id);
                return;
            }
            if state.running.get(&id).map(|unit| unit.seq) != Some(seq) {
                drop(state);
                error!("Task {:?} completed but is not running", id);
                self.shared.emit(TaskEvent::CompletedTwice { id });
                return;
            }
            let Some(unit) = state.running.remove(&id) else {
                return;
            };
            let ready = state.settle_idle_waiters(seq);
            (unit.waiters, ready)
        };

        match &result {
            Ok(_) => {
                debug!("Task {:?} finished", id);
                self.shared.emit(TaskEvent::Finished { id });
            }
            Err(e) => {
                warn!("Task {:?} failed: {e}", id);
                self.shared.emit(TaskEvent::Failed {
                    id,
                    error: e.clone(),
                });
            }
        }

        for waiter in waiters {
            waiter(result.clone());
        }
        for waiter in ready {
            (waiter.callback)();
        }

        self.flush();
    }
}
