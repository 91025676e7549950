//! Registry of synced id maps, addressable by name and by map id.
//!
//! Map ids are themselves interned in a synced *registration map* that
//! lives at [`REGISTRATION_MAP_ID`]. A peer that replays the registration
//! map's events learns which local map every incoming `map_id` refers to.
//! The registry is an ordinary value owned by the server or session; there is
//! no process-wide instance.

use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender, unbounded};
use dashmap::DashMap;

use crate::error::InternError;
use crate::event::{StringMapAction, StringMapEvent};
use crate::interner::IdInterner;
use crate::synced::SyncedIdInterner;

/// Map id of the registration map.
pub const REGISTRATION_MAP_ID: u32 = 0;

/// Name of the registration map.
pub const REGISTRATION_MAP_NAME: &str = "registration";

/// Upper bound on the number of maps a registry can hold.
const MAX_MAPS: u32 = 4096;

/// Owns every synced map of one session.
pub struct SyncedMapRegistry {
    registration: Arc<SyncedIdInterner>,
    maps: DashMap<u32, Arc<SyncedIdInterner>>,
    min_id: u32,
    max_id: u32,
    listeners: Mutex<Vec<Sender<StringMapEvent>>>,
}

impl SyncedMapRegistry {
    /// Creates a registry whose maps default to ids in `[min_id, max_id)`.
    pub fn new(min_id: u32, max_id: u32) -> Result<Self, InternError> {
        if min_id > max_id || max_id == u32::MAX {
            return Err(InternError::InvalidRange { min_id, max_id });
        }
        let inner = Arc::new(IdInterner::new(
            REGISTRATION_MAP_NAME,
            REGISTRATION_MAP_ID + 1,
            MAX_MAPS,
        )?);
        inner.register_with_id(REGISTRATION_MAP_NAME, REGISTRATION_MAP_ID)?;
        let registration = Arc::new(SyncedIdInterner::new(REGISTRATION_MAP_ID, inner));

        let maps = DashMap::new();
        maps.insert(REGISTRATION_MAP_ID, Arc::clone(&registration));
        Ok(Self {
            registration,
            maps,
            min_id,
            max_id,
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// The map that assigns map ids.
    pub fn registration(&self) -> &Arc<SyncedIdInterner> {
        &self.registration
    }

    /// Returns the map called `name`, creating it with the default id range.
    pub fn create(&self, name: &str) -> Result<Arc<SyncedIdInterner>, InternError> {
        self.create_with_range(name, self.min_id, self.max_id)
    }

    /// Returns the map called `name`, creating it with ids in
    /// `[min_id, max_id)` if it does not exist yet.
    pub fn create_with_range(
        &self,
        name: &str,
        min_id: u32,
        max_id: u32,
    ) -> Result<Arc<SyncedIdInterner>, InternError> {
        let map_id = self.registration.register(name)?;
        self.ensure_map(map_id, name, min_id, max_id)
    }

    fn ensure_map(
        &self,
        map_id: u32,
        name: &str,
        min_id: u32,
        max_id: u32,
    ) -> Result<Arc<SyncedIdInterner>, InternError> {
        if let Some(existing) = self.maps.get(&map_id) {
            return Ok(Arc::clone(existing.value()));
        }
        let inner = Arc::new(IdInterner::new(name, min_id, max_id)?);
        // Lock order: listeners, then the map shard.
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let map = Arc::clone(
            self.maps
                .entry(map_id)
                .or_insert_with(|| {
                    let map = SyncedIdInterner::new(map_id, inner);
                    for tx in listeners.iter() {
                        map.attach(tx.clone());
                    }
                    tracing::debug!("Created id map '{}' as #{}", name, map_id);
                    Arc::new(map)
                })
                .value(),
        );
        drop(listeners);
        Ok(map)
    }

    /// Map called `name`.
    pub fn get(&self, name: &str) -> Option<Arc<SyncedIdInterner>> {
        self.get_by_id(self.registration.get_id(name)?)
    }

    /// Map with registry id `map_id`.
    pub fn get_by_id(&self, map_id: u32) -> Option<Arc<SyncedIdInterner>> {
        self.maps.get(&map_id).map(|map| Arc::clone(map.value()))
    }

    /// All maps, registration map first, then by id.
    pub fn all(&self) -> Vec<Arc<SyncedIdInterner>> {
        let mut maps: Vec<_> = self.maps.iter().map(|m| Arc::clone(m.value())).collect();
        maps.sort_unstable_by_key(|m| m.map_id());
        maps
    }

    /// Removes the map called `name`. The registration map cannot be removed.
    pub fn deregister(&self, name: &str) -> bool {
        if name == REGISTRATION_MAP_NAME {
            return false;
        }
        match self.registration.remove(name) {
            Some(map_id) => self.maps.remove(&map_id).is_some(),
            None => false,
        }
    }

    /// Subscribes to the events of every map, current and future.
    pub fn subscribe(&self) -> Receiver<StringMapEvent> {
        let (tx, rx) = unbounded();
        // Held across the walk so a map created concurrently cannot miss `tx`.
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for map in self.maps.iter() {
            map.value().attach(tx.clone());
        }
        listeners.push(tx);
        rx
    }

    /// `Set` events for every map, registration map first.
    pub fn full_sync(&self) -> Vec<StringMapEvent> {
        self.all().iter().map(|map| map.snapshot_event()).collect()
    }

    /// Applies a remote diff to the map it names.
    ///
    /// Diffs of the registration map also create or drop the local maps they
    /// announce.
    ///
    /// # Errors
    ///
    /// [`InternError::UnknownMap`] if `event.map_id` is not known locally.
    pub fn apply(&self, event: &StringMapEvent) -> Result<(), InternError> {
        if event.map_id != REGISTRATION_MAP_ID {
            let map = self
                .get_by_id(event.map_id)
                .ok_or(InternError::UnknownMap(event.map_id))?;
            map.apply(event);
            return Ok(());
        }

        self.registration.apply(event);
        match event.action {
            StringMapAction::Add | StringMapAction::Set => {
                if event.action == StringMapAction::Set {
                    self.maps.retain(|id, map| {
                        *id == REGISTRATION_MAP_ID
                            || self.registration.get(*id).as_deref() == Some(map.name())
                    });
                    // An empty snapshot from a remote clear drops this entry too.
                    self.registration
                        .interner()
                        .register_with_id(REGISTRATION_MAP_NAME, REGISTRATION_MAP_ID)?;
                }
                for (map_id, name) in &event.entries {
                    if *map_id != REGISTRATION_MAP_ID {
                        self.ensure_map(*map_id, name, self.min_id, self.max_id)?;
                    }
                }
            }
            StringMapAction::Remove => {
                for (map_id, _) in &event.entries {
                    if *map_id != REGISTRATION_MAP_ID {
                        self.maps.remove(map_id);
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SyncedMapRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedMapRegistry")
            .field("maps", &self.maps.len())
            .field("range", &(self.min_id..self.max_id))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_resolve_by_name_and_id() {
        let registry = SyncedMapRegistry::new(1, 256).unwrap();
        let items = registry.create("items").unwrap();
        let blocks = registry.create("blocks").unwrap();

        assert_ne!(items.map_id(), REGISTRATION_MAP_ID);
        assert_ne!(items.map_id(), blocks.map_id());
        assert!(Arc::ptr_eq(&registry.create("items").unwrap(), &items));
        assert!(Arc::ptr_eq(&registry.get("blocks").unwrap(), &blocks));
        assert!(Arc::ptr_eq(&registry.get_by_id(items.map_id()).unwrap(), &items));
        assert!(Arc::ptr_eq(
            &registry.get_by_id(REGISTRATION_MAP_ID).unwrap(),
            registry.registration()
        ));
        assert_eq!(registry.all().len(), 3);
    }

    #[test]
    fn test_deregister_is_explicit() {
        let registry = SyncedMapRegistry::new(1, 256).unwrap();
        registry.create("temp").unwrap();
        assert!(registry.deregister("temp"));
        assert!(registry.get("temp").is_none());
        assert!(!registry.deregister("temp"));
        assert!(!registry.deregister(REGISTRATION_MAP_NAME));
    }

    #[test]
    fn test_subscriber_sees_every_map() {
        let registry = SyncedMapRegistry::new(1, 256).unwrap();
        let early = registry.create("early").unwrap();
        let events = registry.subscribe();
        let late = registry.create("late").unwrap();

        early.register("a").unwrap();
        late.register("b").unwrap();

        let seen: Vec<_> = events.try_iter().collect();
        let registration_add = seen
            .iter()
            .filter(|e| e.map_id == REGISTRATION_MAP_ID)
            .count();
        assert_eq!(registration_add, 1);
        assert!(seen.iter().any(|e| e.map_id == early.map_id()));
        assert!(seen.iter().any(|e| e.map_id == late.map_id()));
    }

    #[test]
    fn test_peer_mirrors_server() {
        let server = SyncedMapRegistry::new(1, 256).unwrap();
        let peer = SyncedMapRegistry::new(1, 256).unwrap();
        let events = server.subscribe();

        let items = server.create("items").unwrap();
        items.register("sword").unwrap();
        items.register("shield").unwrap();

        for event in events.try_iter() {
            peer.apply(&event).unwrap();
        }
        let mirrored = peer.get_by_id(items.map_id()).unwrap();
        assert_eq!(mirrored.name(), "items");
        assert_eq!(mirrored.interner().items(), items.interner().items());
        assert_eq!(
            peer.apply(&StringMapEvent::new(99, StringMapAction::Add, Vec::new())),
            Err(InternError::UnknownMap(99))
        );
    }

    #[test]
    fn test_full_sync_bootstraps_new_peer() {
        let server = SyncedMapRegistry::new(1, 256).unwrap();
        server.create("items").unwrap().register("apple").unwrap();
        server.create("blocks").unwrap().register("stone").unwrap();

        let peer = SyncedMapRegistry::new(1, 256).unwrap();
        peer.create("leftover").unwrap();
        let sync = server.full_sync();
        assert_eq!(sync[0].map_id, REGISTRATION_MAP_ID);
        for event in &sync {
            peer.apply(event).unwrap();
        }

        assert!(peer.get("leftover").is_none());
        assert_eq!(peer.get("items").unwrap().get_id("apple"), Some(1));
        assert_eq!(peer.get("blocks").unwrap().get_id("stone"), Some(1));
        assert_eq!(peer.get_by_id(REGISTRATION_MAP_ID).unwrap().name(), REGISTRATION_MAP_NAME);
    }
}
