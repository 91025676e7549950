//! Lock-free string to id map with parent/child id conversion.
//!
//! Ids in `[0, min_id)` are reserved for keys registered with an explicit id.
//! Ids in `[min_id, max_id)` are claimed from an atomic counter. A child map
//! keeps two cache arrays translating its ids to its parent's and back;
//! cache slots store `id + 1` so that `0` marks an empty slot. A cached id is
//! only trusted while the other map still maps it to the same key, so slots
//! left behind by removals or a cleared map are refreshed on the next
//! conversion.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::InternError;

/// Returned by conversions when no mapping exists.
pub const NO_MAPPING: u32 = 0;

/// A concurrent bidirectional map from string keys to integer ids.
pub struct IdInterner {
    name: String,
    min_id: u32,
    max_id: u32,
    next_id: AtomicU32,
    by_key: DashMap<String, u32>,
    by_id: DashMap<u32, String>,
    parent: Option<Arc<IdInterner>>,
    /// Indexed by this map's id, holds parent id + 1.
    to_parent: Box<[AtomicU32]>,
    /// Indexed by the parent's id, holds this map's id + 1.
    from_parent: Box<[AtomicU32]>,
}

fn zeroed(len: u32) -> Box<[AtomicU32]> {
    (0..len).map(|_| AtomicU32::new(0)).collect()
}

impl IdInterner {
    /// Creates a root map handing out ids in `[min_id, max_id)`.
    pub fn new(name: impl Into<String>, min_id: u32, max_id: u32) -> Result<Self, InternError> {
        Self::build(name.into(), min_id, max_id, None)
    }

    /// Creates a map whose ids convert to and from `parent`'s.
    pub fn child_of(
        parent: Arc<IdInterner>,
        name: impl Into<String>,
        min_id: u32,
        max_id: u32,
    ) -> Result<Self, InternError> {
        Self::build(name.into(), min_id, max_id, Some(parent))
    }

    fn build(
        name: String,
        min_id: u32,
        max_id: u32,
        parent: Option<Arc<IdInterner>>,
    ) -> Result<Self, InternError> {
        if min_id > max_id || max_id == u32::MAX {
            return Err(InternError::InvalidRange { min_id, max_id });
        }
        let (to_parent, from_parent) = match &parent {
            Some(parent) => (zeroed(max_id), zeroed(parent.max_id)),
            None => (zeroed(0), zeroed(0)),
        };
        Ok(Self {
            name,
            min_id,
            max_id,
            next_id: AtomicU32::new(min_id),
            by_key: DashMap::new(),
            by_id: DashMap::new(),
            parent,
            to_parent,
            from_parent,
        })
    }

    /// Map name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First dynamically assigned id.
    pub fn min_id(&self) -> u32 {
        self.min_id
    }

    /// One past the last dynamically assigned id.
    pub fn max_id(&self) -> u32 {
        self.max_id
    }

    /// Parent map, if any.
    pub fn parent(&self) -> Option<&Arc<IdInterner>> {
        self.parent.as_ref()
    }

    // -- Registration ------------------------------------------------------

    /// Returns the id of `key`, assigning the next free dynamic id if it has
    /// none.
    ///
    /// # Errors
    ///
    /// [`InternError::Exhausted`] once every id in `[min_id, max_id)` has been
    /// claimed.
    pub fn register(&self, key: &str) -> Result<u32, InternError> {
        self.register_new(key).map(|(id, _)| id)
    }

    /// Like [`register`](Self::register), also reporting whether the key was
    /// newly inserted.
    pub(crate) fn register_new(&self, key: &str) -> Result<(u32, bool), InternError> {
        if let Some(id) = self.by_key.get(key) {
            return Ok((*id, false));
        }
        let claimed = self.claim_id()?;
        match self.by_key.entry(key.to_owned()) {
            // Lost the race: the claimed id stays unused.
            Entry::Occupied(existing) => Ok((*existing.get(), false)),
            Entry::Vacant(vacant) => {
                self.by_id.insert(claimed, key.to_owned());
                vacant.insert(claimed);
                Ok((claimed, true))
            }
        }
    }

    fn claim_id(&self) -> Result<u32, InternError> {
        let mut current = self.next_id.load(Ordering::Acquire);
        loop {
            if current >= self.max_id {
                return Err(InternError::Exhausted {
                    name: self.name.clone(),
                    min_id: self.min_id,
                    max_id: self.max_id,
                });
            }
            match self.next_id.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current),
                Err(observed) => current = observed,
            }
        }
    }

    /// Registers `key` under a fixed id from the reserved range.
    ///
    /// Returns `Ok(false)` if `key` or `id` is already mapped; the first
    /// mapping wins.
    ///
    /// # Errors
    ///
    /// [`InternError::NotReserved`] if `id >= min_id`.
    pub fn register_with_id(&self, key: &str, id: u32) -> Result<bool, InternError> {
        if id >= self.min_id {
            return Err(InternError::NotReserved {
                name: self.name.clone(),
                id,
                min_id: self.min_id,
            });
        }
        Ok(self.insert_exact(key, id))
    }

    /// Inserts `key -> id` as given, skipping the reserved-range check.
    ///
    /// Returns `false` if either side is already mapped or `id >= max_id`.
    pub(crate) fn insert_exact(&self, key: &str, id: u32) -> bool {
        if id >= self.max_id {
            return false;
        }
        match self.by_key.entry(key.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => match self.by_id.entry(id) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(key.to_owned());
                    vacant.insert(id);
                    if id >= self.min_id {
                        self.advance_counter(id + 1);
                    }
                    true
                }
            },
        }
    }

    /// Moves the allocation counter up to `next`, capped at `max_id`.
    pub(crate) fn advance_counter(&self, next: u32) {
        self.next_id
            .fetch_max(next.min(self.max_id), Ordering::AcqRel);
    }

    /// Next id the counter would hand out.
    pub(crate) fn next_id(&self) -> u32 {
        self.next_id.load(Ordering::Acquire)
    }

    /// Removes `key`. Returns its id if it was mapped.
    ///
    /// Drops this map's cached conversion of the id in both directions.
    pub(crate) fn remove_key(&self, key: &str) -> Option<u32> {
        let (_, id) = self.by_key.remove(key)?;
        self.by_id.remove(&id);
        if let Some(slot) = self.to_parent.get(id as usize)
            && let Some(parent_id) = slot.swap(0, Ordering::AcqRel).checked_sub(1)
            && let Some(back) = self.from_parent.get(parent_id as usize)
        {
            let _ = back.compare_exchange(id + 1, 0, Ordering::AcqRel, Ordering::Acquire);
        }
        Some(id)
    }

    // -- Lookup ------------------------------------------------------------

    /// Key mapped to `id`.
    pub fn get(&self, id: u32) -> Option<String> {
        self.by_id.get(&id).map(|key| key.value().clone())
    }

    /// Id mapped to `key`.
    pub fn get_id(&self, key: &str) -> Option<u32> {
        self.by_key.get(key).map(|id| *id)
    }

    /// Returns `true` if `key` is mapped.
    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// All keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.by_key.iter().map(|entry| entry.key().clone()).collect()
    }

    /// All `(id, key)` pairs sorted by id.
    pub fn items(&self) -> Vec<(u32, String)> {
        let mut items: Vec<(u32, String)> = self
            .by_id
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        items.sort_unstable_by_key(|(id, _)| *id);
        items
    }

    fn maps(&self, id: u32, key: &str) -> bool {
        self.by_id.get(&id).is_some_and(|mapped| mapped.value() == key)
    }

    /// Number of mapped keys.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Returns `true` if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    // -- Conversion --------------------------------------------------------

    fn is_child_of(&self, other: &IdInterner) -> bool {
        self.parent
            .as_deref()
            .is_some_and(|parent| std::ptr::eq(parent, other))
    }

    /// Translates `local_id` of this map into the id of the same key in
    /// `other`, registering the key in `other` if needed.
    ///
    /// Returns [`NO_MAPPING`] if `local_id` is not mapped here or `other`
    /// cannot register the key. Converting into this same map returns
    /// `local_id` when it is mapped.
    ///
    /// # Errors
    ///
    /// [`InternError::Unrelated`] unless `other` is this map, its direct
    /// parent or its direct child.
    pub fn convert_to(&self, other: &IdInterner, local_id: u32) -> Result<u32, InternError> {
        if std::ptr::eq(self, other) {
            return Ok(if self.by_id.contains_key(&local_id) {
                local_id
            } else {
                NO_MAPPING
            });
        }
        let (forward, backward) = if self.is_child_of(other) {
            (&self.to_parent, &self.from_parent)
        } else if other.is_child_of(self) {
            (&other.from_parent, &other.to_parent)
        } else {
            return Err(InternError::Unrelated {
                from: self.name.clone(),
                to: other.name.clone(),
            });
        };

        let Some(key) = self.get(local_id) else {
            return Ok(NO_MAPPING);
        };
        if let Some(slot) = forward.get(local_id as usize)
            && let Some(cached) = slot.load(Ordering::Acquire).checked_sub(1)
            && other.maps(cached, &key)
        {
            return Ok(cached);
        }

        let foreign = match other.register(&key) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Cannot convert '{}' from {} to {}: {}", key, self.name, other.name, e);
                return Ok(NO_MAPPING);
            }
        };
        if let Some(slot) = forward.get(local_id as usize)
            && let Some(encoded) = foreign.checked_add(1)
        {
            slot.store(encoded, Ordering::Release);
        }
        if let Some(slot) = backward.get(foreign as usize)
            && let Some(encoded) = local_id.checked_add(1)
        {
            slot.store(encoded, Ordering::Release);
        }
        Ok(foreign)
    }

    /// Translates `foreign_id` of `other` into this map's id.
    pub fn convert_from(&self, other: &IdInterner, foreign_id: u32) -> Result<u32, InternError> {
        other.convert_to(self, foreign_id)
    }

    /// Translates `local_id` into the parent's id, or [`NO_MAPPING`] for a
    /// root map.
    pub fn convert_to_parent(&self, local_id: u32) -> u32 {
        match &self.parent {
            Some(parent) => self.convert_to(parent, local_id).unwrap_or(NO_MAPPING),
            None => NO_MAPPING,
        }
    }

    // -- Reset -------------------------------------------------------------

    /// Removes every mapping and resets the counter to `min_id`.
    ///
    /// The counter is reset first, then this map's conversion caches, then the
    /// key maps. Operations that start after `clear` returns see an empty map;
    /// registrations racing with `clear` may survive or vanish. Caches held by
    /// child maps are not touched; their stale slots fail validation and are
    /// refreshed on the next conversion.
    pub fn clear(&self) {
        self.next_id.store(self.min_id, Ordering::Release);
        for slot in self.to_parent.iter().chain(self.from_parent.iter()) {
            slot.store(0, Ordering::Release);
        }
        self.by_key.clear();
        self.by_id.clear();
        tracing::debug!("Cleared id map '{}'", self.name);
    }
}

impl std::fmt::Debug for IdInterner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdInterner")
            .field("name", &self.name)
            .field("range", &(self.min_id..self.max_id))
            .field("len", &self.len())
            .field("parent", &self.parent.as_ref().map(|p| p.name.as_str()))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Barrier;

    #[test]
    fn test_register_is_idempotent() {
        let map = IdInterner::new("items", 10, 100).unwrap();
        let foo = map.register("foo").unwrap();
        assert_eq!(map.register("foo").unwrap(), foo);
        let bar = map.register("bar").unwrap();
        assert_ne!(foo, bar);
        assert!((10..100).contains(&foo));
        assert!((10..100).contains(&bar));
        assert_eq!(map.get(foo).as_deref(), Some("foo"));
        assert_eq!(map.get_id("bar"), Some(bar));
        assert_eq!(map.items(), vec![(10, "foo".into()), (11, "bar".into())]);
    }

    #[test]
    fn test_capacity_is_fatal() {
        let map = IdInterner::new("tiny", 0, 5).unwrap();
        let ids: Vec<u32> = ["a", "b", "c"]
            .iter()
            .map(|key| map.register(key).unwrap())
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(map.register("d").unwrap(), 3);
        assert_eq!(map.register("e").unwrap(), 4);
        assert_eq!(
            map.register("f"),
            Err(InternError::Exhausted {
                name: "tiny".into(),
                min_id: 0,
                max_id: 5,
            })
        );
        // Existing keys still resolve.
        assert_eq!(map.register("c").unwrap(), 2);
    }

    #[test]
    fn test_reserved_ids() {
        let map = IdInterner::new("blocks", 4, 16).unwrap();
        assert_eq!(map.register_with_id("air", 0), Ok(true));
        assert_eq!(map.register_with_id("air", 1), Ok(false));
        assert_eq!(map.register_with_id("stone", 0), Ok(false));
        assert!(matches!(
            map.register_with_id("dirt", 4),
            Err(InternError::NotReserved { id: 4, .. })
        ));
        assert_eq!(map.get_id("air"), Some(0));
        assert_eq!(map.register("dirt").unwrap(), 4);
    }

    #[test]
    fn test_invalid_range() {
        assert!(IdInterner::new("bad", 5, 4).is_err());
        assert!(IdInterner::new("bad", 0, u32::MAX).is_err());
        assert!(IdInterner::new("empty", 3, 3).unwrap().register("x").is_err());
    }

    #[test]
    fn test_concurrent_register_agrees() {
        let map = Arc::new(IdInterner::new("shared", 1, 10_000).unwrap());
        let barrier = Arc::new(Barrier::new(8));
        let results: Vec<Vec<u32>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let map = Arc::clone(&map);
                    let barrier = Arc::clone(&barrier);
                    s.spawn(move || {
                        barrier.wait();
                        (0..200)
                            .map(|i| map.register(&format!("key{i}")).unwrap())
                            .collect()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for other in &results[1..] {
            assert_eq!(other, &results[0]);
        }
        let distinct: HashSet<u32> = results[0].iter().copied().collect();
        assert_eq!(distinct.len(), 200);
        assert_eq!(map.len(), 200);
        for (i, id) in results[0].iter().enumerate() {
            assert_eq!(map.get(*id), Some(format!("key{i}")));
        }
    }

    #[test]
    fn test_conversion_round_trip() {
        let parent = Arc::new(IdInterner::new("global", 1, 64).unwrap());
        let child = IdInterner::child_of(Arc::clone(&parent), "plugin", 1, 32).unwrap();
        parent.register("filler").unwrap();

        let local = child.register("gem").unwrap();
        let pid = child.convert_to(&parent, local).unwrap();
        assert_ne!(pid, NO_MAPPING);
        assert_eq!(parent.get(pid).as_deref(), Some("gem"));
        assert_eq!(parent.convert_to(&child, pid).unwrap(), local);
        assert_eq!(child.convert_from(&parent, pid).unwrap(), local);
        assert_eq!(child.convert_to_parent(local), pid);

        // Parent-first keys register in the child on demand.
        let ore = parent.register("ore").unwrap();
        let child_ore = parent.convert_to(&child, ore).unwrap();
        assert_eq!(child.get(child_ore).as_deref(), Some("ore"));
        assert_eq!(child.convert_to(&parent, child_ore).unwrap(), ore);
    }

    #[test]
    fn test_conversion_misses() {
        let parent = Arc::new(IdInterner::new("global", 1, 64).unwrap());
        let child = IdInterner::child_of(Arc::clone(&parent), "a", 1, 32).unwrap();
        let sibling = IdInterner::child_of(Arc::clone(&parent), "b", 1, 32).unwrap();

        assert_eq!(child.convert_to(&parent, 9).unwrap(), NO_MAPPING);
        let id = child.register("x").unwrap();
        assert!(matches!(
            child.convert_to(&sibling, id),
            Err(InternError::Unrelated { .. })
        ));
        assert_eq!(parent.convert_to_parent(1), NO_MAPPING);

        let full = Arc::new(IdInterner::new("full", 1, 1).unwrap());
        let small = IdInterner::child_of(Arc::clone(&full), "small", 1, 8).unwrap();
        let id = small.register("y").unwrap();
        assert_eq!(small.convert_to(&full, id).unwrap(), NO_MAPPING);
    }

    #[test]
    fn test_clear_resets_counter_and_caches() {
        let parent = Arc::new(IdInterner::new("global", 1, 64).unwrap());
        let child = IdInterner::child_of(Arc::clone(&parent), "plugin", 1, 32).unwrap();
        let id = child.register("gem").unwrap();
        child.convert_to(&parent, id).unwrap();

        child.clear();
        assert!(child.is_empty());
        assert_eq!(child.convert_to(&parent, id).unwrap(), NO_MAPPING);

        let reused = child.register("rock").unwrap();
        assert_eq!(reused, 1);
        let pid = child.convert_to(&parent, reused).unwrap();
        assert_eq!(parent.get(pid).as_deref(), Some("rock"));
    }

    #[test]
    fn test_removed_key_does_not_convert_to_stale_id() {
        let parent = Arc::new(IdInterner::new("global", 1, 64).unwrap());
        let child = IdInterner::child_of(Arc::clone(&parent), "plugin", 1, 32).unwrap();
        let old = child.register("gem").unwrap();
        let pid = child.convert_to(&parent, old).unwrap();

        assert_eq!(child.remove_key("gem"), Some(old));
        let new = child.register("gem").unwrap();
        assert_ne!(new, old);
        assert_eq!(parent.convert_to(&child, pid).unwrap(), new);
        assert_eq!(child.convert_to(&parent, new).unwrap(), pid);
        assert_eq!(child.convert_to(&parent, old).unwrap(), NO_MAPPING);
    }

    #[test]
    fn test_parent_changes_refresh_child_caches() {
        let parent = Arc::new(IdInterner::new("global", 1, 64).unwrap());
        let child = IdInterner::child_of(Arc::clone(&parent), "plugin", 1, 32).unwrap();
        let id = child.register("gem").unwrap();
        let pid = child.convert_to(&parent, id).unwrap();

        parent.remove_key("gem");
        parent.register("filler").unwrap();
        let fresh = child.convert_to(&parent, id).unwrap();
        assert_ne!(fresh, pid);
        assert_eq!(parent.get(fresh).as_deref(), Some("gem"));

        parent.clear();
        let after_clear = child.convert_to(&parent, id).unwrap();
        assert_eq!(parent.get(after_clear).as_deref(), Some("gem"));
        assert_eq!(parent.convert_to(&child, after_clear).unwrap(), id);
    }

    #[test]
    fn test_convert_to_self_is_identity() {
        let map = IdInterner::new("items", 1, 16).unwrap();
        let id = map.register("torch").unwrap();
        assert_eq!(map.convert_to(&map, id).unwrap(), id);
        assert_eq!(map.convert_to(&map, 9).unwrap(), NO_MAPPING);
    }

    #[test]
    fn test_exact_ids_outside_range_are_rejected() {
        let map = IdInterner::new("items", 1, 100).unwrap();
        assert!(!map.insert_exact("far", 5000));
        assert!(!map.insert_exact("edge", u32::MAX));
        assert!(map.get_id("far").is_none());
        assert_eq!(map.register("local").unwrap(), 1);

        assert!(map.insert_exact("last", 99));
        assert!(matches!(map.register("next"), Err(InternError::Exhausted { .. })));
    }
}
