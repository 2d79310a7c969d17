//! Typed event channels shared between components.
//!
//! Each event kind gets its own [`EventBus`], so a consumer subscribes to
//! exactly one payload shape. Events are snapshot triggers: a receiver that
//! lags behind only needs to re-read current state, so the bounded
//! broadcast buffer is allowed to overwrite old events.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::PlaybackState;

/// Default number of buffered events per bus.
const DEFAULT_CAPACITY: usize = 64;

/// Emitted by the queue store after every mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// Items, order, current item or a pending seek changed.
    Changed { version: u64 },
    /// Playback state changed.
    StateChanged(PlaybackState),
}

/// Emitted by the playlist store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistEvent {
    /// A playlist was created, renamed, deleted or had its items changed.
    Changed { playlist: Uuid },
}

/// Emitted by the decode window and the stream buffer manager.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// The item at the playhead changed.
    CurrentTrackChanged { item: Option<Uuid> },
    /// A seek was issued to the decode engine.
    Seeked { item: Uuid, position: f64 },
    /// The decode engine reached the end of the queue.
    PlaybackFinished,
    /// The last stream listener left and no hardware output is enabled.
    PauseRequested,
}

/// Fan-out channel for one event kind.
#[derive(Debug, Clone)]
pub struct EventBus<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event, ignoring the case where nobody is subscribed.
    pub fn publish(&self, event: T) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::<QueueEvent>::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(QueueEvent::Changed { version: 1 });

        assert_eq!(a.try_recv().unwrap(), QueueEvent::Changed { version: 1 });
        assert_eq!(b.try_recv().unwrap(), QueueEvent::Changed { version: 1 });
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::<PlayerEvent>::new(4);
        bus.publish(PlayerEvent::PlaybackFinished);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
