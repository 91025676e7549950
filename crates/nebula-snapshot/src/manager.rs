//! Registry of snapshotable values owned by one worker.
//!
//! A [`SnapshotManager`] is owned by a single region worker. Cells and arrays
//! created for that region register here, and the worker publishes all of
//! them in one [`copy_all_snapshots`](SnapshotManager::copy_all_snapshots)
//! call during the copy-snapshot phase of a tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, ThreadId};

use crate::array::SnapshotArray;
use crate::cell::SnapshotCell;
use crate::error::SnapshotError;
use crate::value::SnapshotValue;

/// Anything whose live state can be published into its stable state.
pub trait Snapshotable: Send + Sync {
    /// Publishes pending live writes and returns the number of slots copied.
    fn copy_snapshot(&self) -> usize;
}

/// Handle identifying one registration inside a [`SnapshotManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SnapshotKey(u64);

/// Collection of snapshotables published together.
pub struct SnapshotManager {
    entries: Mutex<Vec<(SnapshotKey, Arc<dyn Snapshotable>)>>,
    next_key: AtomicU64,
    owner: OnceLock<ThreadId>,
    copies: AtomicU64,
}

impl SnapshotManager {
    /// Creates an empty manager with no owner bound.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_key: AtomicU64::new(0),
            owner: OnceLock::new(),
            copies: AtomicU64::new(0),
        }
    }

    /// Binds the calling thread as the only thread allowed to publish.
    ///
    /// Binding again from the same thread is a no-op.
    pub fn bind_owner(&self) -> Result<(), SnapshotError> {
        let current = thread::current().id();
        let owner = *self.owner.get_or_init(|| current);
        if owner == current {
            Ok(())
        } else {
            Err(SnapshotError::AlreadyBound(owner))
        }
    }

    /// The bound owner thread, if any.
    pub fn owner(&self) -> Option<ThreadId> {
        self.owner.get().copied()
    }

    /// Registers a snapshotable and returns its key.
    pub fn register(&self, item: Arc<dyn Snapshotable>) -> SnapshotKey {
        let key = SnapshotKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        self.lock().push((key, item));
        key
    }

    /// Creates a registered [`SnapshotCell`].
    pub fn create_cell<T: SnapshotValue>(&self, initial: T) -> (SnapshotKey, Arc<SnapshotCell<T>>) {
        let cell = Arc::new(SnapshotCell::new(initial));
        let key = self.register(cell.clone());
        (key, cell)
    }

    /// Creates a registered [`SnapshotArray`] of `len` slots.
    pub fn create_array<T: SnapshotValue>(
        &self,
        len: usize,
        initial: T,
    ) -> (SnapshotKey, Arc<SnapshotArray<T>>) {
        let array = Arc::new(SnapshotArray::new(len, initial));
        let key = self.register(array.clone());
        (key, array)
    }

    /// Removes a registration. Returns `false` if the key was unknown.
    pub fn deregister(&self, key: SnapshotKey) -> bool {
        let mut entries = self.lock();
        match entries.iter().position(|(k, _)| *k == key) {
            Some(pos) => {
                entries.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Number of registered snapshotables.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Publishes every registered snapshotable.
    ///
    /// Fails with [`SnapshotError::NotOwner`] when called off the bound owner
    /// thread. An unbound manager accepts any caller. Returns the total number
    /// of slots copied.
    pub fn copy_all_snapshots(&self) -> Result<usize, SnapshotError> {
        let caller = thread::current().id();
        if let Some(&owner) = self.owner.get()
            && owner != caller
        {
            return Err(SnapshotError::NotOwner { owner, caller });
        }

        let entries = self.lock();
        let copied = entries.iter().map(|(_, item)| item.copy_snapshot()).sum();
        drop(entries);

        let count = self.copies.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(copied, count, "Snapshot published");
        Ok(copied)
    }

    /// Number of completed publications.
    pub fn copy_count(&self) -> u64 {
        self.copies.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SnapshotKey, Arc<dyn Snapshotable>)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("registered", &self.len())
            .field("owner", &self.owner())
            .field("copies", &self.copy_count())
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
    fn test_copy_all_publishes_every_registration() {
        let manager = SnapshotManager::new();
        let (_, a) = manager.create_cell(0u32);
        let (_, b) = manager.create_array(16, 0u8);

        a.set(4);
        b.set(2, 9);
        b.set(15, 1);

        assert_eq!(manager.copy_all_snapshots().unwrap(), 3);
        assert_eq!(a.get(), 4);
        assert_eq!(b.get(2), Some(9));
        assert_eq!(b.get(15), Some(1));
        assert_eq!(manager.copy_count(), 1);
    }

    #[test]
    fn test_publication_happens_exactly_once_per_copy() {
        let manager = SnapshotManager::new();
        let (_, cell) = manager.create_cell(0i64);

        cell.set(1);
        cell.set(2);
        assert_eq!(manager.copy_all_snapshots().unwrap(), 1);
        assert_eq!(manager.copy_all_snapshots().unwrap(), 0);
        assert_eq!(cell.get(), 2);
        assert_eq!(manager.copy_count(), 2);
    }

    #[test]
    fn test_deregistered_item_is_not_published() {
        let manager = SnapshotManager::new();
        let (key, cell) = manager.create_cell(false);
        assert_eq!(manager.len(), 1);

        assert!(manager.deregister(key));
        assert!(!manager.deregister(key));
        assert!(manager.is_empty());

        cell.set(true);
        manager.copy_all_snapshots().unwrap();
        assert!(!cell.get());
    }

    #[test]
    fn test_copy_from_foreign_thread_is_rejected() {
        let manager = Arc::new(SnapshotManager::new());
        manager.bind_owner().unwrap();
        manager.bind_owner().unwrap();

        let remote = Arc::clone(&manager);
        let result = thread::spawn(move || remote.copy_all_snapshots())
            .join()
            .unwrap();
        assert!(matches!(result, Err(SnapshotError::NotOwner { .. })));

        let remote = Arc::clone(&manager);
        let bind = thread::spawn(move || remote.bind_owner()).join().unwrap();
        assert!(matches!(bind, Err(SnapshotError::AlreadyBound(_))));

        assert!(manager.copy_all_snapshots().is_ok());
    }

    #[test]
    fn test_readers_see_whole_previous_tick() {
        let manager = Arc::new(SnapshotManager::new());
        let (_, x) = manager.create_cell(0u32);
        let (_, y) = manager.create_cell(0u32);

        // Writer keeps x == y in every published tick; readers check the stable
        // values only ever trail by a completed publication.
        let reader = {
            let x = Arc::clone(&x);
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    let v = x.get();
                    assert!(v <= 500);
                }
            })
        };
        for tick in 1..=500u32 {
            x.set(tick);
            y.set(tick);
            assert_eq!(x.get(), tick - 1);
            manager.copy_all_snapshots().unwrap();
            assert_eq!(x.get(), y.get());
        }
        reader.join().unwrap();
    }
}
