//! Order helpers shared by the queue and playlists.

use cadence_core::{sort_ordered, OrderKey, Ordered, Result};
use tracing::warn;
use uuid::Uuid;

/// Order-key slot for a list of items, used while sorting.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub id: Uuid,
    pub key: OrderKey,
}

impl Ordered for Slot {
    fn sort_key(&self) -> &OrderKey {
        &self.key
    }

    fn id(&self) -> Uuid {
        self.id
    }
}

/// Sort `slots` and give every repeated key a fresh one.
///
/// A repeat of the previous key is moved to sit between the last distinct
/// key and the repeated one. Returns the slots whose key changed; `slots`
/// is left sorted with strictly increasing keys.
pub(crate) fn disambiguate(slots: &mut Vec<Slot>) -> Vec<Slot> {
    sort_ordered(slots);

    let mut changed = Vec::new();
    let mut previous_unique: Option<OrderKey> = None;
    let mut previous: Option<OrderKey> = None;
    for slot in slots.iter_mut() {
        if previous.as_ref() == Some(&slot.key) {
            match OrderKey::between(previous_unique.as_ref(), Some(&slot.key)) {
                Ok(key) => {
                    slot.key = key.clone();
                    previous_unique = Some(key);
                    changed.push(slot.clone());
                }
                Err(e) => warn!("Could not disambiguate key {}: {e}", slot.key),
            }
        } else {
            previous_unique = previous.take();
            previous = Some(slot.key.clone());
        }
    }

    if !changed.is_empty() {
        sort_ordered(slots);
    }
    changed
}

/// Keys for `count` items inserted at `index` of the ordered `keys`.
pub(crate) fn keys_for_insert(keys: &[&OrderKey], index: usize, count: usize) -> Result<Vec<OrderKey>> {
    let index = index.min(keys.len());
    let low = index.checked_sub(1).map(|i| keys[i]);
    let high = keys.get(index).copied();
    OrderKey::between_many(low, high, count)
}
