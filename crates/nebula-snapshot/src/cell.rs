//! A single double-buffered scalar.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::manager::Snapshotable;
use crate::value::SnapshotValue;

/// One live/stable pair plus a dirty flag.
///
/// The stable value only changes inside [`Snapshotable::copy_snapshot`]. Any
/// number of writes between two copies collapse to the last one.
pub struct SnapshotCell<T: SnapshotValue> {
    live: T::Atomic,
    stable: T::Atomic,
    dirty: AtomicBool,
}

impl<T: SnapshotValue> SnapshotCell<T> {
    /// Creates a cell whose live and stable values both start at `initial`.
    ///
    /// `initial` is what [`get`](Self::get) returns before the first copy.
    pub fn new(initial: T) -> Self {
        Self {
            live: T::new_atomic(initial),
            stable: T::new_atomic(initial),
            dirty: AtomicBool::new(false),
        }
    }

    /// Returns the stable (previous-tick) value.
    pub fn get(&self) -> T {
        T::load(&self.stable, Ordering::Acquire)
    }

    /// Returns the live value, including writes made this tick.
    pub fn get_live(&self) -> T {
        T::load(&self.live, Ordering::Acquire)
    }

    /// Writes the live value and marks the cell dirty.
    ///
    /// Returns the previous live value.
    pub fn set(&self, value: T) -> T {
        let old = T::swap(&self.live, value, Ordering::AcqRel);
        self.dirty.store(true, Ordering::Release);
        old
    }

    /// Writes `value` only if the live value is still `expect`.
    pub fn compare_and_set(&self, expect: T, value: T) -> bool {
        match T::compare_exchange(&self.live, expect, value) {
            Ok(_) => {
                self.dirty.store(true, Ordering::Release);
                true
            }
            Err(_) => false,
        }
    }

    /// Returns `true` if a write is waiting for the next copy.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

impl<T: SnapshotValue + Default> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: SnapshotValue> Snapshotable for SnapshotCell<T> {
    fn copy_snapshot(&self) -> usize {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return 0;
        }
        let value = T::load(&self.live, Ordering::Acquire);
        T::store(&self.stable, value, Ordering::Release);
        1
    }
}

impl<T: SnapshotValue> fmt::Debug for SnapshotCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotCell")
            .field("live", &self.get_live())
            .field("stable", &self.get())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
