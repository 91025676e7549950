//! An [`IdInterner`] that reports every mutation as a [`StringMapEvent`].

use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::error::InternError;
use crate::event::{EventListeners, StringMapAction, StringMapEvent};
use crate::interner::IdInterner;

/// Id map whose local changes are published for replication.
///
/// Changes applied from remote events through [`apply`](Self::apply) are not
/// re-published.
pub struct SyncedIdInterner {
    map_id: u32,
    inner: Arc<IdInterner>,
    listeners: EventListeners,
}

impl SyncedIdInterner {
    /// Wraps `inner` under registry id `map_id`.
    pub fn new(map_id: u32, inner: Arc<IdInterner>) -> Self {
        Self {
            map_id,
            inner,
            listeners: EventListeners::new(),
        }
    }

    /// Registry id carried by this map's events.
    pub fn map_id(&self) -> u32 {
        self.map_id
    }

    /// The underlying map, for lookups and conversion.
    pub fn interner(&self) -> &Arc<IdInterner> {
        &self.inner
    }

    /// Map name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Opens a subscription to this map's events.
    pub fn subscribe(&self) -> Receiver<StringMapEvent> {
        self.listeners.subscribe()
    }

    /// Forwards this map's events into an existing channel.
    pub fn attach(&self, tx: Sender<StringMapEvent>) {
        self.listeners.attach(tx);
    }

    fn emit(&self, action: StringMapAction, entries: Vec<(u32, String)>) {
        self.listeners
            .publish(StringMapEvent::new(self.map_id, action, entries));
    }

    /// Registers `key`, emitting an `Add` event if it was new.
    pub fn register(&self, key: &str) -> Result<u32, InternError> {
        let (id, inserted) = self.inner.register_new(key)?;
        if inserted {
            self.emit(StringMapAction::Add, vec![(id, key.to_owned())]);
        }
        Ok(id)
    }

    /// Registers `key` under a reserved id, emitting an `Add` event if it was
    /// inserted.
    pub fn register_with_id(&self, key: &str, id: u32) -> Result<bool, InternError> {
        let inserted = self.inner.register_with_id(key, id)?;
        if inserted {
            self.emit(StringMapAction::Add, vec![(id, key.to_owned())]);
        }
        Ok(inserted)
    }

    /// Removes `key`, emitting a `Remove` event if it was mapped.
    pub fn remove(&self, key: &str) -> Option<u32> {
        let id = self.inner.remove_key(key)?;
        self.emit(StringMapAction::Remove, vec![(id, key.to_owned())]);
        Some(id)
    }

    /// Emits an empty `Set` event, then clears the map.
    pub fn clear(&self) {
        self.emit(StringMapAction::Set, Vec::new());
        self.inner.clear();
    }

    /// Key mapped to `id`.
    pub fn get(&self, id: u32) -> Option<String> {
        self.inner.get(id)
    }

    /// Id mapped to `key`.
    pub fn get_id(&self, key: &str) -> Option<u32> {
        self.inner.get_id(key)
    }

    /// Loads mappings saved with [`IdInterner::save_to`] and, if any were
    /// added, publishes the full contents as a `Set` event.
    pub fn load_from(&self, path: &Path) -> Result<usize, InternError> {
        let inserted = self.inner.load_from(path)?;
        if inserted > 0 {
            self.listeners.publish(self.snapshot_event());
        }
        Ok(inserted)
    }

    /// A `Set` event carrying the full contents, for a newly connected peer.
    pub fn snapshot_event(&self) -> StringMapEvent {
        StringMapEvent::new(self.map_id, StringMapAction::Set, self.inner.items())
    }

    /// Applies a remote diff without emitting events.
    ///
    /// Remote ids are authoritative: they are inserted as-is. Entries outside
    /// this map's id space or conflicting with an existing local mapping are
    /// skipped and logged.
    pub fn apply(&self, event: &StringMapEvent) {
        match event.action {
            StringMapAction::Set => {
                self.inner.clear();
                self.insert_all(&event.entries);
            }
            StringMapAction::Add => self.insert_all(&event.entries),
            StringMapAction::Remove => {
                for (_, key) in &event.entries {
                    self.inner.remove_key(key);
                }
            }
        }
    }

    fn insert_all(&self, entries: &[(u32, String)]) {
        for (id, key) in entries {
            if *id >= self.inner.max_id() {
                tracing::warn!(
                    "Rejected remote entry {} -> '{}' outside map '{}' (max id {})",
                    id,
                    key,
                    self.name(),
                    self.inner.max_id()
                );
                continue;
            }
            if !self.inner.insert_exact(key, *id) && self.inner.get_id(key) != Some(*id) {
                tracing::warn!(
                    "Conflicting remote entry {} -> '{}' in map '{}'",
                    id,
                    key,
                    self.name()
                );
            }
        }
    }
}

impl std::fmt::Debug for SyncedIdInterner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedIdInterner")
            .field("map_id", &self.map_id)
            .field("inner", &self.inner)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
