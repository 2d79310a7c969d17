//! The play queue.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence_core::{
    EventBus, Library, OrderKey, PlaybackState, QueueEvent, QueueItem, RepeatMode, Result,
    TrackKey,
};
use cadence_store::{BatchOp, KvStore};
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ordering::{disambiguate, keys_for_insert, Slot};
use crate::records::{queue_key, QueueRecord, QUEUE_PREFIX};

/// The logical play queue.
///
/// Holds items by id plus the derived order, the current item, a pending
/// seek request and the queue-level playback state. Every mutation publishes
/// [`QueueEvent::Changed`]; consumers re-read the state they need.
pub struct QueueStore {
    items: HashMap<Uuid, QueueItem>,
    /// Item ids sorted by order key, then id.
    order: Vec<Uuid>,
    current: Option<Uuid>,
    /// Position the decode engine should seek to within the current item.
    seek_request: Option<f64>,
    state: PlaybackState,
    repeat: RepeatMode,
    /// Instant at which the current item would have been at position zero.
    track_start: Option<Instant>,
    paused_position: f64,
    version: u64,
    store: Arc<dyn KvStore>,
    library: Arc<dyn Library>,
    events: EventBus<QueueEvent>,
}

impl QueueStore {
    /// Create an empty queue.
    pub fn new(store: Arc<dyn KvStore>, library: Arc<dyn Library>) -> Self {
        Self {
            items: HashMap::new(),
            order: Vec::new(),
            current: None,
            seek_request: None,
            state: PlaybackState::Stopped,
            repeat: RepeatMode::Off,
            track_start: None,
            paused_position: 0.0,
            version: 0,
            store,
            library,
            events: EventBus::default(),
        }
    }

    /// Load the persisted queue.
    ///
    /// Records that cannot be parsed or that reference tracks missing from
    /// the library are deleted from the store.
    pub fn load(store: Arc<dyn KvStore>, library: Arc<dyn Library>) -> Result<Self> {
        let mut queue = Self::new(store, library);
        let mut stale = Vec::new();

        for (key, value) in queue.store.iterate(QUEUE_PREFIX)? {
            let id = key
                .strip_prefix(QUEUE_PREFIX)
                .and_then(|id| Uuid::parse_str(id).ok());
            let record = serde_json::from_str::<QueueRecord>(&value);
            match (id, record) {
                (Some(id), Ok(record)) if queue.library.contains(&record.key) => {
                    queue.items.insert(
                        id,
                        QueueItem {
                            id,
                            track_key: record.key,
                            sort_key: record.sort_key,
                            auto_inserted: record.is_random,
                        },
                    );
                }
                (_, Err(e)) => {
                    warn!("Dropping unreadable queue record {key}: {e}");
                    stale.push(BatchOp::del(key));
                }
                _ => {
                    debug!("Dropping queue record {key} for unknown track");
                    stale.push(BatchOp::del(key));
                }
            }
        }

        queue.persist(stale);
        queue.recompute_order();
        info!("Loaded {} queue items", queue.items.len());
        Ok(queue)
    }

    /// Bus carrying this queue's change notifications.
    pub fn events(&self) -> &EventBus<QueueEvent> {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Monotonic counter bumped by every published change.
    pub const fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, id: Uuid) -> Option<&QueueItem> {
        self.items.get(&id)
    }

    /// Items in queue order.
    pub fn ordered(&self) -> Vec<QueueItem> {
        self.order
            .iter()
            .filter_map(|id| self.items.get(id))
            .cloned()
            .collect()
    }

    /// Item ids in queue order.
    pub fn ordered_ids(&self) -> &[Uuid] {
        &self.order
    }

    pub fn index_of(&self, id: Uuid) -> Option<usize> {
        self.order.iter().position(|candidate| *candidate == id)
    }

    pub const fn current(&self) -> Option<Uuid> {
        self.current
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current.and_then(|id| self.index_of(id))
    }

    pub fn current_item(&self) -> Option<&QueueItem> {
        self.current.and_then(|id| self.items.get(&id))
    }

    pub const fn state(&self) -> PlaybackState {
        self.state
    }

    pub const fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    /// Pending seek position for the current item.
    pub const fn seek_request(&self) -> Option<f64> {
        self.seek_request
    }

    /// Auto-inserted filler items, in queue order.
    pub fn auto_items(&self) -> Vec<QueueItem> {
        self.ordered()
            .into_iter()
            .filter(|item| item.auto_inserted)
            .collect()
    }

    /// Insert `track_keys` so the first new item lands at `at_index`.
    ///
    /// Keys missing from the library are skipped. Returns the ids of the
    /// new items in order.
    pub fn insert(&mut self, at_index: usize, track_keys: &[TrackKey], auto: bool) -> Result<Vec<Uuid>> {
        let known: Vec<&TrackKey> = track_keys
            .iter()
            .filter(|key| {
                let found = self.library.contains(key);
                if !found {
                    debug!("Skipping unknown track {key}");
                }
                found
            })
            .collect();
        if known.is_empty() {
            return Ok(Vec::new());
        }

        let keys = {
            let ordered_keys: Vec<&OrderKey> = self
                .order
                .iter()
                .filter_map(|id| self.items.get(id))
                .map(|item| &item.sort_key)
                .collect();
            keys_for_insert(&ordered_keys, at_index, known.len())?
        };

        let mut ids = Vec::with_capacity(known.len());
        let mut ops = Vec::with_capacity(known.len());
        for (track_key, sort_key) in known.into_iter().zip(keys) {
            let item = QueueItem::new(track_key.clone(), sort_key, auto);
            ops.push(Self::put_op(&item));
            ids.push(item.id);
            self.items.insert(item.id, item);
        }
        self.persist(ops);
        self.recompute_order();
        self.changed();
        Ok(ids)
    }

    /// Append `track_keys` to the end of the queue.
    pub fn append(&mut self, track_keys: &[TrackKey], auto: bool) -> Result<Vec<Uuid>> {
        self.insert(self.order.len(), track_keys, auto)
    }

    /// Remove items. Unknown ids are ignored.
    ///
    /// If the current item is removed, the next surviving item becomes
    /// current with a seek to its start. A stopped queue only moves its
    /// current item.
    pub fn remove(&mut self, ids: &[Uuid]) {
        let removed: HashSet<Uuid> = ids
            .iter()
            .copied()
            .filter(|id| self.items.contains_key(id))
            .collect();
        if removed.is_empty() {
            return;
        }

        if let Some(current) = self.current.filter(|id| removed.contains(id)) {
            let next = self
                .index_of(current)
                .and_then(|index| {
                    self.order[index + 1..]
                        .iter()
                        .find(|id| !removed.contains(id))
                        .copied()
                });
            match next {
                Some(next) => self.restart_at(next),
                None => {
                    self.current = None;
                    self.set_stopped();
                }
            }
        }

        let ops: Vec<BatchOp> = removed
            .iter()
            .map(|id| BatchOp::del(queue_key(*id)))
            .collect();
        for id in &removed {
            self.items.remove(id);
        }
        self.persist(ops);
        self.recompute_order();
        self.changed();
    }

    /// Remove every item referencing one of `track_keys`, e.g. after the
    /// tracks were deleted from the library.
    pub fn remove_tracks(&mut self, track_keys: &HashSet<TrackKey>) {
        let ids: Vec<Uuid> = self
            .order
            .iter()
            .filter(|id| {
                self.items
                    .get(id)
                    .is_some_and(|item| track_keys.contains(&item.track_key))
            })
            .copied()
            .collect();
        self.remove(&ids);
    }

    /// Give `ids` new keys strictly between `pred` and `succ`, keeping
    /// their relative order. Unknown ids are ignored.
    pub fn move_items(&mut self, ids: &[Uuid], pred: Option<&OrderKey>, succ: Option<&OrderKey>) -> Result<()> {
        let wanted: HashSet<Uuid> = ids.iter().copied().collect();
        let moving: Vec<Uuid> = self
            .order
            .iter()
            .filter(|id| wanted.contains(id))
            .copied()
            .collect();
        if moving.is_empty() {
            return Ok(());
        }

        let keys = OrderKey::between_many(pred, succ, moving.len())?;
        let mut ops = Vec::with_capacity(moving.len());
        for (id, key) in moving.into_iter().zip(keys) {
            if let Some(item) = self.items.get_mut(&id) {
                item.sort_key = key;
                ops.push(Self::put_op(item));
            }
        }
        self.persist(ops);
        self.recompute_order();
        self.changed();
        Ok(())
    }

    /// Move `ids` so the first lands at `index` of the queue without them.
    pub fn move_to_index(&mut self, ids: &[Uuid], index: usize) -> Result<()> {
        let moving: HashSet<Uuid> = ids.iter().copied().collect();
        let remaining: Vec<&OrderKey> = self
            .order
            .iter()
            .filter(|id| !moving.contains(id))
            .filter_map(|id| self.items.get(id))
            .map(|item| &item.sort_key)
            .collect();
        let index = index.min(remaining.len());
        let pred = index.checked_sub(1).map(|i| remaining[i].clone());
        let succ = remaining.get(index).map(|key| (*key).clone());
        self.move_items(ids, pred.as_ref(), succ.as_ref())
    }

    /// Make `id` current and request a seek to `position` seconds.
    /// Unknown ids are ignored.
    pub fn set_current(&mut self, id: Uuid, position: f64) {
        if !self.items.contains_key(&id) {
            return;
        }
        self.seek_to(id, position);
        if self.state == PlaybackState::Stopped {
            self.set_state(PlaybackState::Paused);
        }
        self.changed();
    }

    /// Make the item at `index` current. Out-of-range indices are ignored.
    pub fn set_current_index(&mut self, index: usize, position: f64) {
        if let Some(id) = self.order.get(index).copied() {
            self.set_current(id, position);
        }
    }

    /// Record that the decode engine moved on to `id` by itself.
    ///
    /// No seek is requested. With [`RepeatMode::One`] the previous item is
    /// sought back to its start instead.
    pub fn track_advanced(&mut self, id: Uuid) {
        if self.current == Some(id) || !self.items.contains_key(&id) {
            return;
        }
        if self.repeat == RepeatMode::One {
            if let Some(current) = self.current {
                self.restart_at(current);
                self.changed();
                return;
            }
        }
        self.current = Some(id);
        self.paused_position = 0.0;
        if self.state == PlaybackState::Playing {
            self.track_start = Some(Instant::now());
        }
        self.changed();
    }

    /// Handle the decode engine running out of queue.
    pub fn end_of_queue(&mut self) {
        let restart = match self.repeat {
            RepeatMode::One => self.current,
            RepeatMode::All => self.order.first().copied(),
            RepeatMode::Off => None,
        };
        match restart {
            Some(id) => self.restart_at(id),
            None => {
                self.current = None;
                self.set_stopped();
            }
        }
        self.changed();
    }

    /// Clear the pending seek once it has been issued.
    pub fn clear_seek_request(&mut self) {
        self.seek_request = None;
    }

    pub fn set_repeat(&mut self, repeat: RepeatMode) {
        if self.repeat != repeat {
            self.repeat = repeat;
            self.changed();
        }
    }

    /// Start or resume playback. With no current item the first item is
    /// selected.
    pub fn play(&mut self) {
        if self.current.is_none() {
            let Some(first) = self.order.first().copied() else {
                return;
            };
            self.seek_to(first, 0.0);
        } else if self.state == PlaybackState::Stopped {
            if let Some(current) = self.current {
                self.seek_to(current, 0.0);
            }
        }
        if self.state != PlaybackState::Playing {
            self.track_start = Some(started_at(self.paused_position));
            self.set_state(PlaybackState::Playing);
        }
        self.changed();
    }

    /// Pause, remembering the elapsed position.
    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.paused_position = self.elapsed(Instant::now());
        self.track_start = None;
        self.set_state(PlaybackState::Paused);
        self.changed();
    }

    pub fn stop(&mut self) {
        if self.state == PlaybackState::Stopped {
            return;
        }
        self.set_stopped();
        self.changed();
    }

    /// Seconds into the current item at `now`.
    pub fn elapsed(&self, now: Instant) -> f64 {
        match (self.state, self.track_start) {
            (PlaybackState::Playing, Some(start)) => now.saturating_duration_since(start).as_secs_f64(),
            _ => self.paused_position,
        }
    }

    /// Re-key every item in a random order. The current item stays current.
    pub fn shuffle(&mut self) -> Result<()> {
        if self.order.len() < 2 {
            return Ok(());
        }
        let mut shuffled = self.order.clone();
        shuffled.shuffle(&mut rand::thread_rng());
        let keys = OrderKey::between_many(None, None, shuffled.len())?;

        let mut ops = Vec::with_capacity(shuffled.len());
        for (id, key) in shuffled.into_iter().zip(keys) {
            if let Some(item) = self.items.get_mut(&id) {
                item.sort_key = key;
                ops.push(Self::put_op(item));
            }
        }
        self.persist(ops);
        self.recompute_order();
        self.changed();
        Ok(())
    }

    /// Remove every item and stop.
    pub fn clear(&mut self) {
        let ops: Vec<BatchOp> = self
            .items
            .keys()
            .map(|id| BatchOp::del(queue_key(*id)))
            .collect();
        self.items.clear();
        self.order.clear();
        self.current = None;
        self.set_stopped();
        self.persist(ops);
        self.changed();
    }

    /// Re-derive the order and give repeated keys fresh ones.
    pub fn recompute_order(&mut self) {
        let mut slots: Vec<Slot> = self
            .items
            .values()
            .map(|item| Slot {
                id: item.id,
                key: item.sort_key.clone(),
            })
            .collect();

        let changed = disambiguate(&mut slots);
        let mut ops = Vec::with_capacity(changed.len());
        for slot in changed {
            if let Some(item) = self.items.get_mut(&slot.id) {
                debug!("Rekeyed duplicate queue item {}", item.id);
                item.sort_key = slot.key;
                ops.push(Self::put_op(item));
            }
        }
        self.persist(ops);
        self.order = slots.into_iter().map(|slot| slot.id).collect();
    }

    fn seek_to(&mut self, id: Uuid, position: f64) {
        self.current = Some(id);
        self.seek_request = Some(position);
        self.paused_position = position;
        if self.state == PlaybackState::Playing {
            self.track_start = Some(started_at(position));
        }
    }

    /// Make `id` current from its start. Stopped playback stays stopped
    /// with no seek pending; [`Self::play`] seeks when it resumes.
    fn restart_at(&mut self, id: Uuid) {
        if self.state == PlaybackState::Stopped {
            self.current = Some(id);
        } else {
            self.seek_to(id, 0.0);
        }
    }

    fn set_stopped(&mut self) {
        self.seek_request = None;
        self.paused_position = 0.0;
        self.track_start = None;
        self.set_state(PlaybackState::Stopped);
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            self.state = state;
            self.events.publish(QueueEvent::StateChanged(state));
        }
    }

    fn changed(&mut self) {
        self.version += 1;
        self.events.publish(QueueEvent::Changed {
            version: self.version,
        });
    }

    fn put_op(item: &QueueItem) -> BatchOp {
        let record = QueueRecord {
            key: item.track_key.clone(),
            sort_key: item.sort_key.clone(),
            is_random: item.auto_inserted,
        };
        match serde_json::to_string(&record) {
            Ok(value) => BatchOp::put(queue_key(item.id), value),
            Err(e) => {
                warn!("Failed to encode queue item {}: {e}", item.id);
                BatchOp::del(queue_key(item.id))
            }
        }
    }

    /// Best-effort write; the in-memory state stays authoritative.
    fn persist(&self, ops: Vec<BatchOp>) {
        if ops.is_empty() {
            return;
        }
        if let Err(e) = self.store.batch(ops) {
            warn!("Failed to persist queue change: {e}");
        }
    }
}

/// Instant at which playback would have been at `position` seconds.
fn started_at(position: f64) -> Instant {
    let now = Instant::now();
    let offset = Duration::try_from_secs_f64(position.max(0.0)).unwrap_or_default();
    now.checked_sub(offset).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use cadence_core::{LibraryTrack, MemoryLibrary};
    use cadence_store::MemoryStore;
    use proptest::prelude::*;

    fn library(count: usize) -> Arc<MemoryLibrary> {
        let library = MemoryLibrary::new();
        for i in 0..count {
            library.upsert(LibraryTrack::new(format!("t{i}"), format!("/music/{i}.flac")));
        }
        Arc::new(library)
    }

    fn keys(range: std::ops::Range<usize>) -> Vec<TrackKey> {
        range.map(|i| format!("t{i}")).collect()
    }

    fn queue_with(count: usize) -> (QueueStore, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let queue = QueueStore::new(store.clone(), library(count));
        (queue, store)
    }

    fn assert_strictly_ordered(queue: &QueueStore) {
        let items = queue.ordered();
        for pair in items.windows(2) {
            assert!(pair[0].sort_key < pair[1].sort_key);
        }
        for (index, item) in items.iter().enumerate() {
            assert_eq!(queue.index_of(item.id), Some(index));
        }
    }

    #[test]
    fn test_insert_into_empty_then_remove_middle() {
        let (mut queue, _store) = queue_with(3);
        let ids = queue.insert(0, &keys(0..3), false).unwrap();
        assert_eq!(ids.len(), 3);
        assert_strictly_ordered(&queue);

        let before: Vec<OrderKey> = queue.ordered().into_iter().map(|i| i.sort_key).collect();
        queue.remove(&[ids[1]]);
        let after: Vec<OrderKey> = queue.ordered().into_iter().map(|i| i.sort_key).collect();
        assert_eq!(after, vec![before[0].clone(), before[2].clone()]);
    }

    #[test]
    fn test_move_to_front() {
        let (mut queue, _store) = queue_with(2);
        let existing = queue.insert(0, &keys(0..1), false).unwrap()[0];
        let moved = queue.insert(1, &keys(1..2), false).unwrap()[0];

        queue.move_to_index(&[moved], 0).unwrap();
        assert!(queue.get(moved).unwrap().sort_key < queue.get(existing).unwrap().sort_key);
        assert_eq!(queue.ordered_ids(), &[moved, existing]);
    }

    #[test]
    fn test_move_preserves_relative_order() {
        let (mut queue, _store) = queue_with(5);
        let ids = queue.insert(0, &keys(0..5), false).unwrap();
        queue.move_to_index(&[ids[3], ids[1]], 0).unwrap();
        assert_eq!(queue.ordered_ids(), &[ids[1], ids[3], ids[0], ids[2], ids[4]]);
        assert_strictly_ordered(&queue);
    }

    #[test]
    fn test_unknown_keys_and_ids_are_tolerated() {
        let (mut queue, _store) = queue_with(2);
        let ids = queue
            .insert(0, &["t0".into(), "missing".into(), "t1".into()], false)
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(queue.insert(0, &[], false).unwrap().is_empty());

        let version = queue.version();
        queue.remove(&[Uuid::new_v4()]);
        queue.move_items(&[Uuid::new_v4()], None, None).unwrap();
        assert_eq!(queue.version(), version);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_removing_current_advances_past_removed_items() {
        let (mut queue, _store) = queue_with(4);
        let ids = queue.insert(0, &keys(0..4), false).unwrap();
        queue.set_current(ids[1], 30.0);
        queue.clear_seek_request();

        queue.remove(&[ids[1], ids[2]]);
        assert_eq!(queue.current(), Some(ids[3]));
        assert_eq!(queue.seek_request(), Some(0.0));

        queue.remove(&[ids[3]]);
        assert_eq!(queue.current(), None);
        assert_eq!(queue.state(), PlaybackState::Stopped);
        assert_eq!(queue.seek_request(), None);
    }

    #[test]
    fn test_remove_after_stop_keeps_stopped_without_seek() {
        let (mut queue, _store) = queue_with(3);
        let ids = queue.insert(0, &keys(0..3), false).unwrap();
        queue.play();
        queue.stop();

        queue.remove(&[ids[0]]);
        assert_eq!(queue.current(), Some(ids[1]));
        assert_eq!(queue.state(), PlaybackState::Stopped);
        assert_eq!(queue.seek_request(), None);
        assert!(queue.elapsed(Instant::now()).abs() < f64::EPSILON);

        queue.play();
        assert_eq!(queue.current(), Some(ids[1]));
        assert_eq!(queue.seek_request(), Some(0.0));
    }

    #[test]
    fn test_repeat_while_stopped_requests_no_seek() {
        let (mut queue, _store) = queue_with(3);
        let ids = queue.insert(0, &keys(0..3), false).unwrap();
        queue.set_current(ids[2], 0.0);
        queue.play();
        queue.stop();

        queue.set_repeat(RepeatMode::All);
        queue.end_of_queue();
        assert_eq!(queue.current(), Some(ids[0]));
        assert_eq!(queue.state(), PlaybackState::Stopped);
        assert_eq!(queue.seek_request(), None);

        queue.set_repeat(RepeatMode::One);
        queue.track_advanced(ids[1]);
        assert_eq!(queue.current(), Some(ids[0]));
        assert_eq!(queue.state(), PlaybackState::Stopped);
        assert_eq!(queue.seek_request(), None);
    }

    #[test]
    fn test_play_pause_stop() {
        let (mut queue, _store) = queue_with(2);
        let ids = queue.insert(0, &keys(0..2), false).unwrap();
        let mut rx = queue.events().subscribe();

        queue.play();
        assert_eq!(queue.state(), PlaybackState::Playing);
        assert_eq!(queue.current(), Some(ids[0]));
        assert_eq!(queue.seek_request(), Some(0.0));

        queue.pause();
        assert_eq!(queue.state(), PlaybackState::Paused);
        assert!(queue.elapsed(Instant::now()) >= 0.0);

        queue.stop();
        assert_eq!(queue.state(), PlaybackState::Stopped);
        assert_eq!(queue.seek_request(), None);
        assert!(queue.elapsed(Instant::now()).abs() < f64::EPSILON);

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let QueueEvent::StateChanged(state) = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![PlaybackState::Playing, PlaybackState::Paused, PlaybackState::Stopped]
        );
    }

    #[test]
    fn test_elapsed_while_playing() {
        let (mut queue, _store) = queue_with(1);
        let id = queue.insert(0, &keys(0..1), false).unwrap()[0];
        queue.set_current(id, 10.0);
        queue.play();
        let elapsed = queue.elapsed(Instant::now() + Duration::from_secs(5));
        assert!((14.9..15.5).contains(&elapsed));
    }

    #[test]
    fn test_end_of_queue_follows_repeat_mode() {
        let (mut queue, _store) = queue_with(3);
        let ids = queue.insert(0, &keys(0..3), false).unwrap();
        queue.set_current(ids[2], 0.0);
        queue.play();

        queue.set_repeat(RepeatMode::All);
        queue.end_of_queue();
        assert_eq!(queue.current(), Some(ids[0]));

        queue.set_repeat(RepeatMode::One);
        queue.end_of_queue();
        assert_eq!(queue.current(), Some(ids[0]));
        assert_eq!(queue.seek_request(), Some(0.0));

        queue.set_repeat(RepeatMode::Off);
        queue.end_of_queue();
        assert_eq!(queue.current(), None);
        assert_eq!(queue.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_track_advanced_respects_repeat_one() {
        let (mut queue, _store) = queue_with(2);
        let ids = queue.insert(0, &keys(0..2), false).unwrap();
        queue.set_current(ids[0], 0.0);
        queue.clear_seek_request();

        queue.track_advanced(ids[1]);
        assert_eq!(queue.current(), Some(ids[1]));
        assert_eq!(queue.seek_request(), None);

        queue.set_repeat(RepeatMode::One);
        queue.track_advanced(ids[0]);
        assert_eq!(queue.current(), Some(ids[1]));
        assert_eq!(queue.seek_request(), Some(0.0));
    }

    #[test]
    fn test_duplicate_keys_are_disambiguated() {
        let (mut queue, store) = queue_with(3);
        let ids = queue.insert(0, &keys(0..3), false).unwrap();
        let shared = queue.get(ids[0]).unwrap().sort_key.clone();
        for id in &ids {
            queue.items.get_mut(id).unwrap().sort_key = shared.clone();
        }
        queue.recompute_order();
        assert_strictly_ordered(&queue);

        let stored = store.iterate(QUEUE_PREFIX).unwrap();
        let distinct: HashSet<String> = stored
            .iter()
            .map(|(_, v)| serde_json::from_str::<QueueRecord>(v).unwrap().sort_key.to_string())
            .collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_shuffle_keeps_current_and_items() {
        let (mut queue, _store) = queue_with(8);
        let ids = queue.insert(0, &keys(0..8), false).unwrap();
        queue.set_current(ids[4], 0.0);
        queue.shuffle().unwrap();

        assert_eq!(queue.current(), Some(ids[4]));
        let mut after: Vec<Uuid> = queue.ordered_ids().to_vec();
        after.sort();
        let mut before = ids;
        before.sort();
        assert_eq!(after, before);
        assert_strictly_ordered(&queue);
    }

    #[test]
    fn test_remove_tracks_and_auto_items() {
        let (mut queue, _store) = queue_with(3);
        queue.insert(0, &keys(0..2), false).unwrap();
        let auto = queue.append(&keys(2..3), true).unwrap();
        assert_eq!(queue.auto_items().len(), 1);
        assert_eq!(queue.auto_items()[0].id, auto[0]);

        queue.remove_tracks(&HashSet::from(["t0".to_string(), "t2".to_string()]));
        assert_eq!(queue.len(), 1);
        assert!(queue.auto_items().is_empty());

        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_load_drops_unknown_tracks() {
        let store = Arc::new(MemoryStore::new());
        let lib = library(3);
        let ids = {
            let mut queue = QueueStore::new(store.clone(), lib.clone());
            queue.insert(0, &keys(0..3), true).unwrap()
        };
        store.put("Playlist.garbage", "not json").unwrap();
        lib.remove("t1");

        let queue = QueueStore::load(store.clone(), lib).unwrap();
        assert_eq!(queue.ordered_ids(), &[ids[0], ids[2]]);
        assert!(queue.get(ids[0]).unwrap().auto_inserted);
        assert_eq!(store.iterate(QUEUE_PREFIX).unwrap().len(), 2);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(usize, usize),
        Remove(usize),
        Move(usize, usize),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..20, 1usize..4).prop_map(|(at, n)| Op::Insert(at, n)),
            (0usize..20).prop_map(Op::Remove),
            (0usize..20, 0usize..20).prop_map(|(from, to)| Op::Move(from, to)),
        ]
    }

    proptest! {
        #[test]
        fn prop_order_stays_consistent(ops in proptest::collection::vec(arb_op(), 1..40)) {
            let (mut queue, _store) = queue_with(4);
            for op in ops {
                match op {
                    Op::Insert(at, n) => {
                        queue.insert(at, &keys(0..n), false).unwrap();
                    }
                    Op::Remove(index) => {
                        if let Some(id) = queue.ordered_ids().get(index).copied() {
                            queue.remove(&[id]);
                        }
                    }
                    Op::Move(from, to) => {
                        if let Some(id) = queue.ordered_ids().get(from).copied() {
                            queue.move_to_index(&[id], to).unwrap();
                        }
                    }
                }
                let items = queue.ordered();
                prop_assert_eq!(items.len(), queue.len());
                for pair in items.windows(2) {
                    prop_assert!(pair[0].sort_key < pair[1].sort_key);
                }
                for (index, item) in items.iter().enumerate() {
                    prop_assert_eq!(queue.index_of(item.id), Some(index));
                }
            }
        }
    }
}
