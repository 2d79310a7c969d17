//! Encoded audio fan-out to live listeners.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cadence_core::{EventBus, PlayerEvent, Result};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::attach::{AttachState, Attachment, Transition};
use crate::engine::{DecodeEngine, EncodedChunk, EncoderOutput, EngineEvent, LiveEntryId};

/// Stream tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamConfig {
    /// Maximum duration of retained audio, and how long the encoder stays
    /// attached after the last listener leaves.
    pub lookback: Duration,
    /// How often the encoder is polled.
    pub pump_interval: Duration,
    /// Whether audio also plays on local hardware.
    pub hardware_output: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(8),
            pump_interval: Duration::from_millis(50),
            hardware_output: false,
        }
    }
}

/// Identifier of a connected listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    sink: mpsc::UnboundedSender<Bytes>,
    /// Chunks written so far.
    delivered: u64,
}

impl Listener {
    /// Write a chunk. Returns false once the listener has gone away.
    fn write(&mut self, data: &Bytes) -> bool {
        if self.sink.send(data.clone()).is_err() {
            return false;
        }
        self.delivered += 1;
        true
    }
}

/// Audio already sent to listeners, kept for late joiners.
#[derive(Debug, Clone)]
struct RecentBuffer {
    data: Bytes,
    entry: LiveEntryId,
    position: f64,
    duration: f64,
}

struct State {
    listeners: Vec<Listener>,
    next_listener: u64,
    header_buffers: Vec<Bytes>,
    new_header_buffers: Vec<Bytes>,
    expect_headers: bool,
    recent: VecDeque<RecentBuffer>,
    /// Clear the recent buffers again when the encoder reaches the end of
    /// its playlist, dropping audio encoded before a seek took effect.
    clear_on_end: bool,
    attachment: Attachment,
    /// Bumped whenever a pending idle detach must be abandoned.
    idle_generation: u64,
}

struct Inner<E> {
    engine: Arc<E>,
    config: StreamConfig,
    state: Mutex<State>,
    events: EventBus<PlayerEvent>,
}

/// Owns encoder attachment and fans encoded audio out to listeners.
///
/// Cheap to clone; clones share the same state.
pub struct StreamBufferManager<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for StreamBufferManager<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: DecodeEngine> StreamBufferManager<E> {
    pub fn new(engine: Arc<E>, config: StreamConfig, events: EventBus<PlayerEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                config,
                state: Mutex::new(State {
                    listeners: Vec::new(),
                    next_listener: 0,
                    header_buffers: Vec::new(),
                    new_header_buffers: Vec::new(),
                    expect_headers: true,
                    recent: VecDeque::new(),
                    clear_on_end: false,
                    attachment: Attachment::default(),
                    idle_generation: 0,
                }),
                events,
            }),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Connect a listener.
    ///
    /// The returned receiver first yields the current header chunks, then
    /// the retained recent audio, then live audio as it is produced.
    pub fn add_listener(&self) -> (ListenerId, mpsc::UnboundedReceiver<Bytes>) {
        let (sink, rx) = mpsc::unbounded_channel();
        let (id, transition) = {
            let mut state = self.inner.state.lock();
            state.next_listener += 1;
            let id = ListenerId(state.next_listener);
            let mut listener = Listener {
                id,
                sink,
                delivered: 0,
            };
            let catch_up = state
                .header_buffers
                .iter()
                .chain(state.recent.iter().map(|recent| &recent.data));
            for data in catch_up {
                listener.write(data);
            }
            trace!("Listener {:?} caught up with {} chunks", id, listener.delivered);
            state.listeners.push(listener);
            state.idle_generation += 1;
            (id, state.attachment.request(true))
        };
        info!("Stream listener {:?} connected", id);
        self.start(transition);
        (id, rx)
    }

    /// Disconnect a listener. Unknown ids are ignored.
    pub fn remove_listener(&self, id: ListenerId) {
        let now_idle = {
            let mut state = self.inner.state.lock();
            let before = state.listeners.len();
            state.listeners.retain(|listener| listener.id != id);
            before != state.listeners.len() && state.listeners.is_empty()
        };
        info!("Stream listener {:?} disconnected", id);
        if now_idle {
            self.on_idle();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }

    /// Number of retained recent-audio chunks.
    pub fn recent_len(&self) -> usize {
        self.inner.state.lock().recent.len()
    }

    /// Seconds of retained recent audio.
    pub fn recent_duration(&self) -> f64 {
        self.inner
            .state
            .lock()
            .recent
            .iter()
            .map(|recent| recent.duration)
            .sum()
    }

    pub fn attach_state(&self) -> AttachState {
        self.inner.state.lock().attachment.state()
    }

    /// Drop all retained recent audio.
    pub fn clear_buffer(&self) {
        self.inner.state.lock().recent.clear();
    }

    /// Drop retained audio after a seek, and again once the encoder has
    /// flushed what it produced before the seek.
    pub fn seek_clear(&self) {
        let mut state = self.inner.state.lock();
        state.recent.clear();
        state.clear_on_end = true;
    }

    /// Pull every available piece of encoder output and distribute it.
    pub fn pump(&self) {
        let lost_all = {
            let mut state = self.inner.state.lock();
            let had_listeners = !state.listeners.is_empty();
            while let Some(output) = self.inner.engine.encoder_get_buffer() {
                match output {
                    EncoderOutput::EndOfPlaylist => {
                        if state.clear_on_end {
                            debug!("Clearing stream buffers after seek");
                            state.recent.clear();
                            state.clear_on_end = false;
                        }
                        state.expect_headers = true;
                    }
                    EncoderOutput::Chunk(chunk) => Self::distribute(&mut state, chunk),
                }
            }
            self.prune(&mut state);
            had_listeners && state.listeners.is_empty()
        };
        if lost_all {
            self.on_idle();
        }
    }

    /// Pump on every engine notification and at the configured interval.
    pub async fn run(self) {
        let mut engine_rx = self.inner.engine.subscribe();
        let mut ticker = tokio::time::interval(self.inner.config.pump_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.pump(),
                event = engine_rx.recv() => match event {
                    Ok(EngineEvent::BufferReady) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        self.pump();
                    }
                    Ok(EngineEvent::NowPlaying) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("Stream pump stopped");
    }

    /// Headers and footers go to every connected listener. Headers are also
    /// kept for listeners that connect later.
    fn distribute(state: &mut State, chunk: EncodedChunk) {
        Self::write_all(&mut state.listeners, &chunk.data);
        let Some(entry) = chunk.entry else {
            if state.expect_headers {
                state.new_header_buffers.push(chunk.data);
            }
            return;
        };

        if state.expect_headers {
            if !state.new_header_buffers.is_empty() {
                state.header_buffers = std::mem::take(&mut state.new_header_buffers);
            }
            state.expect_headers = false;
        }

        state.recent.push_back(RecentBuffer {
            data: chunk.data,
            entry,
            position: chunk.position,
            duration: chunk.duration,
        });
    }

    fn write_all(listeners: &mut Vec<Listener>, data: &Bytes) {
        listeners.retain_mut(|listener| {
            let open = listener.write(data);
            if !open {
                debug!("Stream listener {:?} went away", listener.id);
            }
            open
        });
    }

    /// Drop audio at or before the playhead, then cap the look-back.
    fn prune(&self, state: &mut State) {
        if let Some(playhead) = self.inner.engine.position() {
            let order: HashMap<LiveEntryId, usize> = self
                .inner
                .engine
                .playlist()
                .iter()
                .enumerate()
                .map(|(index, entry)| (entry.id, index))
                .collect();
            let playhead_index = order.get(&playhead.entry).copied();
            while let Some(front) = state.recent.front() {
                let played = match (order.get(&front.entry), playhead_index) {
                    (None, _) => true,
                    (Some(index), Some(playing)) => {
                        *index < playing || (*index == playing && front.position <= playhead.offset)
                    }
                    (Some(_), None) => false,
                };
                if !played {
                    break;
                }
                state.recent.pop_front();
            }
        }

        let limit = self.inner.config.lookback.as_secs_f64();
        let mut total: f64 = state.recent.iter().map(|recent| recent.duration).sum();
        while total > limit {
            let Some(front) = state.recent.pop_front() else {
                break;
            };
            total -= front.duration;
        }
    }

    fn on_idle(&self) {
        let generation = {
            let mut state = self.inner.state.lock();
            state.idle_generation += 1;
            state.idle_generation
        };
        if !self.inner.config.hardware_output {
            debug!("No listeners and no hardware output, requesting pause");
            self.inner.events.publish(PlayerEvent::PauseRequested);
        }

        let manager = self.clone();
        let lookback = self.inner.config.lookback;
        tokio::spawn(async move {
            tokio::time::sleep(lookback).await;
            manager.idle_expired(generation);
        });
    }

    fn idle_expired(&self, generation: u64) {
        let transition = {
            let mut state = self.inner.state.lock();
            if state.idle_generation != generation || !state.listeners.is_empty() {
                return;
            }
            state.attachment.request(false)
        };
        self.start(transition);
    }

    fn start(&self, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };
        debug!("Encoder transition {:?}", transition);
        let manager = self.clone();
        tokio::spawn(async move {
            let engine = Arc::clone(&manager.inner.engine);
            let result = match transition {
                Transition::Attach => engine.encoder_attach().await,
                Transition::Detach => engine.encoder_detach().await,
            };
            manager.transition_completed(transition, result);
        });
    }

    fn transition_completed(&self, transition: Transition, result: Result<()>) {
        if let Err(e) = &result {
            warn!("Encoder {:?} failed: {e}", transition);
        }
        let next = self.inner.state.lock().attachment.completed(result.is_ok());
        self.start(next);
    }
}
