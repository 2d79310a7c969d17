//! Stored playlists.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cadence_core::{
    Error, EventBus, Library, OrderKey, Playlist, PlaylistEvent, PlaylistItem, Result, TrackKey,
};
use cadence_store::{BatchOp, KvStore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ordering::{disambiguate, keys_for_insert, Slot};
use crate::records::{
    parse_playlist_item_key, playlist_item_key, playlist_items_prefix, playlist_meta_key,
    PlaylistItemRecord, PlaylistMetaRecord, PLAYLIST_ITEM_PREFIX, PLAYLIST_META_PREFIX,
};

/// Named playlists, each with its own order key space.
pub struct PlaylistStore {
    playlists: HashMap<Uuid, Playlist>,
    store: Arc<dyn KvStore>,
    library: Arc<dyn Library>,
    events: EventBus<PlaylistEvent>,
}

impl PlaylistStore {
    pub fn new(store: Arc<dyn KvStore>, library: Arc<dyn Library>) -> Self {
        Self {
            playlists: HashMap::new(),
            store,
            library,
            events: EventBus::default(),
        }
    }

    /// Load every stored playlist.
    ///
    /// Items referencing unknown tracks or missing playlists, and records
    /// that cannot be parsed, are deleted from the store.
    pub fn load(store: Arc<dyn KvStore>, library: Arc<dyn Library>) -> Result<Self> {
        let mut playlists = Self::new(store, library);
        let mut stale = Vec::new();

        for (key, value) in playlists.store.iterate(PLAYLIST_META_PREFIX)? {
            match serde_json::from_str::<PlaylistMetaRecord>(&value) {
                Ok(meta) => {
                    playlists.playlists.insert(
                        meta.id,
                        Playlist {
                            id: meta.id,
                            name: meta.name,
                            mtime: meta.mtime,
                            items: HashMap::new(),
                        },
                    );
                }
                Err(e) => {
                    warn!("Dropping unreadable playlist record {key}: {e}");
                    stale.push(BatchOp::del(key));
                }
            }
        }

        for (key, value) in playlists.store.iterate(PLAYLIST_ITEM_PREFIX)? {
            let ids = parse_playlist_item_key(&key);
            let record = serde_json::from_str::<PlaylistItemRecord>(&value);
            let (Some((playlist_id, item_id)), Ok(record)) = (ids, record) else {
                warn!("Dropping unreadable playlist item {key}");
                stale.push(BatchOp::del(key));
                continue;
            };
            let known = playlists.library.contains(&record.key);
            match playlists.playlists.get_mut(&playlist_id) {
                Some(playlist) if known => {
                    playlist.items.insert(
                        item_id,
                        PlaylistItem {
                            id: item_id,
                            track_key: record.key,
                            sort_key: record.sort_key,
                        },
                    );
                }
                _ => {
                    debug!("Dropping orphaned playlist item {key}");
                    stale.push(BatchOp::del(key));
                }
            }
        }

        playlists.persist(stale);
        let ids: Vec<Uuid> = playlists.playlists.keys().copied().collect();
        for id in ids {
            playlists.recompute_order(id);
        }
        info!("Loaded {} playlists", playlists.playlists.len());
        Ok(playlists)
    }

    pub fn events(&self) -> &EventBus<PlaylistEvent> {
        &self.events
    }

    pub fn get(&self, id: Uuid) -> Option<&Playlist> {
        self.playlists.get(&id)
    }

    /// All playlists sorted by name.
    pub fn list(&self) -> Vec<&Playlist> {
        let mut playlists: Vec<&Playlist> = self.playlists.values().collect();
        playlists.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        playlists
    }

    pub fn create(&mut self, name: impl Into<String>) -> Uuid {
        let playlist = Playlist::new(name);
        let id = playlist.id;
        self.persist(vec![Self::meta_op(&playlist)]);
        self.playlists.insert(id, playlist);
        self.changed(id);
        id
    }

    pub fn rename(&mut self, id: Uuid, name: impl Into<String>) -> Result<()> {
        let playlist = self.playlist_mut(id)?;
        playlist.name = name.into();
        playlist.touch();
        let op = Self::meta_op(playlist);
        self.persist(vec![op]);
        self.changed(id);
        Ok(())
    }

    pub fn delete(&mut self, id: Uuid) -> Result<()> {
        let playlist = self
            .playlists
            .remove(&id)
            .ok_or_else(|| Error::UnknownPlaylist(id.to_string()))?;
        let mut ops = vec![BatchOp::del(playlist_meta_key(id))];
        match self.store.iterate(&playlist_items_prefix(id)) {
            Ok(stored) => ops.extend(stored.into_iter().map(|(key, _)| BatchOp::del(key))),
            Err(e) => {
                warn!("Failed to scan items of playlist {id}: {e}");
                ops.extend(
                    playlist
                        .items
                        .keys()
                        .map(|item| BatchOp::del(playlist_item_key(id, *item))),
                );
            }
        }
        self.persist(ops);
        self.changed(id);
        Ok(())
    }

    /// Insert `track_keys` into playlist `id` so the first lands at
    /// `at_index`. Unknown track keys are skipped.
    pub fn insert(&mut self, id: Uuid, at_index: usize, track_keys: &[TrackKey]) -> Result<Vec<Uuid>> {
        let known: Vec<TrackKey> = track_keys
            .iter()
            .filter(|key| self.library.contains(key))
            .cloned()
            .collect();
        let playlist = self.playlist_mut(id)?;
        if known.is_empty() {
            return Ok(Vec::new());
        }

        let ordered = playlist.items_in_order();
        let ordered_keys: Vec<&OrderKey> = ordered.iter().map(|item| &item.sort_key).collect();
        let keys = keys_for_insert(&ordered_keys, at_index, known.len())?;

        let mut ids = Vec::with_capacity(known.len());
        let mut ops = Vec::with_capacity(known.len() + 1);
        for (track_key, sort_key) in known.into_iter().zip(keys) {
            let item = PlaylistItem::new(track_key, sort_key);
            ops.push(Self::item_op(id, &item));
            ids.push(item.id);
            playlist.items.insert(item.id, item);
        }
        playlist.touch();
        ops.push(Self::meta_op(playlist));
        self.persist(ops);
        self.recompute_order(id);
        self.changed(id);
        Ok(ids)
    }

    /// Remove items from playlist `id`. Unknown item ids are ignored.
    pub fn remove_items(&mut self, id: Uuid, item_ids: &[Uuid]) -> Result<()> {
        let playlist = self.playlist_mut(id)?;
        let mut ops: Vec<BatchOp> = item_ids
            .iter()
            .filter(|item| playlist.items.remove(item).is_some())
            .map(|item| BatchOp::del(playlist_item_key(id, *item)))
            .collect();
        if ops.is_empty() {
            return Ok(());
        }
        playlist.touch();
        ops.push(Self::meta_op(playlist));
        self.persist(ops);
        self.changed(id);
        Ok(())
    }

    /// Give `item_ids` new keys between `pred` and `succ` within playlist
    /// `id`, keeping their relative order.
    pub fn move_items(
        &mut self,
        id: Uuid,
        item_ids: &[Uuid],
        pred: Option<&OrderKey>,
        succ: Option<&OrderKey>,
    ) -> Result<()> {
        let playlist = self.playlist_mut(id)?;
        let wanted: HashSet<Uuid> = item_ids.iter().copied().collect();
        let moving: Vec<Uuid> = playlist
            .items_in_order()
            .into_iter()
            .map(|item| item.id)
            .filter(|item| wanted.contains(item))
            .collect();
        if moving.is_empty() {
            return Ok(());
        }

        let keys = OrderKey::between_many(pred, succ, moving.len())?;
        let mut ops = Vec::with_capacity(moving.len() + 1);
        for (item_id, key) in moving.into_iter().zip(keys) {
            if let Some(item) = playlist.items.get_mut(&item_id) {
                item.sort_key = key;
                ops.push(Self::item_op(id, item));
            }
        }
        playlist.touch();
        ops.push(Self::meta_op(playlist));
        self.persist(ops);
        self.recompute_order(id);
        self.changed(id);
        Ok(())
    }

    /// Drop every item referencing one of `track_keys` from all playlists.
    pub fn remove_tracks(&mut self, track_keys: &HashSet<TrackKey>) {
        let affected: Vec<(Uuid, Vec<Uuid>)> = self
            .playlists
            .values()
            .map(|playlist| {
                let items = playlist
                    .items
                    .values()
                    .filter(|item| track_keys.contains(&item.track_key))
                    .map(|item| item.id)
                    .collect::<Vec<_>>();
                (playlist.id, items)
            })
            .filter(|(_, items)| !items.is_empty())
            .collect();

        for (id, items) in affected {
            if let Err(e) = self.remove_items(id, &items) {
                warn!("Failed to drop deleted tracks from playlist {id}: {e}");
            }
        }
    }

    fn recompute_order(&mut self, id: Uuid) {
        let Some(playlist) = self.playlists.get_mut(&id) else {
            return;
        };
        let mut slots: Vec<Slot> = playlist
            .items
            .values()
            .map(|item| Slot {
                id: item.id,
                key: item.sort_key.clone(),
            })
            .collect();

        let mut ops = Vec::new();
        for slot in disambiguate(&mut slots) {
            if let Some(item) = playlist.items.get_mut(&slot.id) {
                item.sort_key = slot.key;
                ops.push(Self::item_op(id, item));
            }
        }
        self.persist(ops);
    }

    fn playlist_mut(&mut self, id: Uuid) -> Result<&mut Playlist> {
        self.playlists
            .get_mut(&id)
            .ok_or_else(|| Error::UnknownPlaylist(id.to_string()))
    }

    fn changed(&self, playlist: Uuid) {
        self.events.publish(PlaylistEvent::Changed { playlist });
    }

    fn meta_op(playlist: &Playlist) -> BatchOp {
        let record = PlaylistMetaRecord {
            id: playlist.id,
            name: playlist.name.clone(),
            mtime: playlist.mtime,
        };
        encode(playlist_meta_key(playlist.id), &record)
    }

    fn item_op(playlist: Uuid, item: &PlaylistItem) -> BatchOp {
        let record = PlaylistItemRecord {
            key: item.track_key.clone(),
            sort_key: item.sort_key.clone(),
        };
        encode(playlist_item_key(playlist, item.id), &record)
    }

    fn persist(&self, ops: Vec<BatchOp>) {
        if ops.is_empty() {
            return;
        }
        if let Err(e) = self.store.batch(ops) {
            warn!("Failed to persist playlist change: {e}");
        }
    }
}

fn encode(key: String, record: &impl serde::Serialize) -> BatchOp {
    match serde_json::to_string(record) {
        Ok(value) => BatchOp::put(key, value),
        Err(e) => {
            warn!("Failed to encode {key}: {e}");
            BatchOp::del(key)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use cadence_core::{LibraryTrack, MemoryLibrary};
    use cadence_store::MemoryStore;

    fn library() -> Arc<MemoryLibrary> {
        let library = MemoryLibrary::new();
        for i in 0..4 {
            library.upsert(LibraryTrack::new(format!("t{i}"), format!("/music/{i}.ogg")));
        }
        Arc::new(library)
    }

    fn track_keys(keys: &[&str]) -> Vec<TrackKey> {
        keys.iter().map(|k| (*k).to_string()).collect()
    }

    #[test]
    fn test_crud_updates_mtime_and_events() {
        let mut playlists = PlaylistStore::new(Arc::new(MemoryStore::new()), library());
        let mut rx = playlists.events().subscribe();

        let id = playlists.create("Road trip");
        let created = playlists.get(id).unwrap().mtime;
        playlists.rename(id, "Night drive").unwrap();
        assert_eq!(playlists.get(id).unwrap().name, "Night drive");
        assert!(playlists.get(id).unwrap().mtime >= created);

        assert_eq!(rx.try_recv().unwrap(), PlaylistEvent::Changed { playlist: id });

        playlists.delete(id).unwrap();
        assert!(playlists.get(id).is_none());
        assert!(matches!(
            playlists.rename(id, "gone"),
            Err(Error::UnknownPlaylist(_))
        ));
    }

    #[test]
    fn test_items_order_and_move() {
        let mut playlists = PlaylistStore::new(Arc::new(MemoryStore::new()), library());
        let id = playlists.create("Mix");
        let ids = playlists
            .insert(id, 0, &track_keys(&["t0", "t1", "missing", "t2"]))
            .unwrap();
        assert_eq!(ids.len(), 3);

        let first = playlists.get(id).unwrap().items_in_order()[0].sort_key.clone();
        playlists.move_items(id, &[ids[2]], None, Some(&first)).unwrap();
        let order: Vec<Uuid> = playlists
            .get(id)
            .unwrap()
            .items_in_order()
            .iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(order, vec![ids[2], ids[0], ids[1]]);

        playlists.remove_items(id, &[ids[0], Uuid::new_v4()]).unwrap();
        assert_eq!(playlists.get(id).unwrap().len(), 2);
    }

    #[test]
    fn test_load_and_cascade() {
        let store = Arc::new(MemoryStore::new());
        let lib = library();
        let (id, ids) = {
            let mut playlists = PlaylistStore::new(store.clone(), lib.clone());
            let id = playlists.create("Saved");
            let ids = playlists.insert(id, 0, &track_keys(&["t0", "t1", "t3"])).unwrap();
            (id, ids)
        };
        let orphan = format!("{PLAYLIST_ITEM_PREFIX}{}.{}", Uuid::new_v4(), Uuid::new_v4());
        store.put(&orphan, r#"{"key":"t0","sortKey":"1"}"#).unwrap();
        lib.remove("t1");

        let mut playlists = PlaylistStore::load(store.clone(), lib).unwrap();
        let playlist = playlists.get(id).unwrap();
        assert_eq!(playlist.name, "Saved");
        let order: Vec<Uuid> = playlist.items_in_order().iter().map(|i| i.id).collect();
        assert_eq!(order, vec![ids[0], ids[2]]);
        assert_eq!(store.iterate(PLAYLIST_ITEM_PREFIX).unwrap().len(), 2);

        playlists.remove_tracks(&HashSet::from(["t3".to_string()]));
        assert_eq!(playlists.get(id).unwrap().len(), 1);
        assert_eq!(playlists.list().len(), 1);
    }
}
