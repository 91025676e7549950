//! Fixed-length double-buffered arrays.
//!
//! Each slot is its own live/stable pair. Dirty slots are tracked in a packed
//! bitset so a copy only touches slots written since the previous tick.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::manager::Snapshotable;
use crate::value::SnapshotValue;

const WORD_BITS: usize = 64;

/// A fixed-length array of live/stable slot pairs.
pub struct SnapshotArray<T: SnapshotValue> {
    live: Box<[T::Atomic]>,
    stable: Box<[T::Atomic]>,
    /// One bit per slot, set when the live value changed since the last copy.
    dirty: Box<[AtomicU64]>,
    any_dirty: AtomicBool,
}

impl<T: SnapshotValue> SnapshotArray<T> {
    /// Creates an array of `len` slots, all holding `initial`.
    pub fn new(len: usize, initial: T) -> Self {
        Self::build(len, |_| initial)
    }

    /// Creates an array whose live and stable buffers both start as `values`.
    pub fn from_values(values: &[T]) -> Self {
        Self::build(values.len(), |i| values[i])
    }

    fn build(len: usize, mut init: impl FnMut(usize) -> T) -> Self {
        let live = (0..len).map(|i| T::new_atomic(init(i))).collect();
        let stable = (0..len).map(|i| T::new_atomic(init(i))).collect();
        let dirty = (0..len.div_ceil(WORD_BITS))
            .map(|_| AtomicU64::new(0))
            .collect();
        Self {
            live,
            stable,
            dirty,
            any_dirty: AtomicBool::new(false),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns `true` if the array has no slots.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Stable value at `index`, or `None` if out of range.
    pub fn get(&self, index: usize) -> Option<T> {
        self.stable
            .get(index)
            .map(|slot| T::load(slot, Ordering::Acquire))
    }

    /// Live value at `index`, or `None` if out of range.
    pub fn get_live(&self, index: usize) -> Option<T> {
        self.live
            .get(index)
            .map(|slot| T::load(slot, Ordering::Acquire))
    }

    /// Writes the live value at `index` and marks it dirty.
    ///
    /// Returns the previous live value, or `None` if out of range.
    pub fn set(&self, index: usize, value: T) -> Option<T> {
        let slot = self.live.get(index)?;
        let old = T::swap(slot, value, Ordering::AcqRel);
        self.mark_dirty(index);
        Some(old)
    }

    /// Writes `value` at `index` only if the live value is still `expect`.
    pub fn compare_and_set(&self, index: usize, expect: T, value: T) -> bool {
        let Some(slot) = self.live.get(index) else {
            return false;
        };
        if T::compare_exchange(slot, expect, value).is_ok() {
            self.mark_dirty(index);
            true
        } else {
            false
        }
    }

    /// Returns `true` if any slot is waiting for the next copy.
    pub fn is_dirty(&self) -> bool {
        self.any_dirty.load(Ordering::Acquire)
    }

    /// Copies the whole stable buffer out.
    pub fn stable_values(&self) -> Vec<T> {
        self.stable
            .iter()
            .map(|slot| T::load(slot, Ordering::Acquire))
            .collect()
    }

    /// Copies the whole live buffer out.
    pub fn live_values(&self) -> Vec<T> {
        self.live
            .iter()
            .map(|slot| T::load(slot, Ordering::Acquire))
            .collect()
    }

    fn mark_dirty(&self, index: usize) {
        let bit = 1u64 << (index % WORD_BITS);
        self.dirty[index / WORD_BITS].fetch_or(bit, Ordering::AcqRel);
        self.any_dirty.store(true, Ordering::Release);
    }
}

impl<T: SnapshotValue> Snapshotable for SnapshotArray<T> {
    fn copy_snapshot(&self) -> usize {
        if !self.any_dirty.swap(false, Ordering::AcqRel) {
            return 0;
        }
        let mut copied = 0;
        for (word_index, word) in self.dirty.iter().enumerate() {
            let mut bits = word.swap(0, Ordering::AcqRel);
            while bits != 0 {
                let index = word_index * WORD_BITS + bits.trailing_zeros() as usize;
                let value = T::load(&self.live[index], Ordering::Acquire);
                T::store(&self.stable[index], value, Ordering::Release);
                bits &= bits - 1;
                copied += 1;
            }
        }
        copied
    }
}

impl<T: SnapshotValue> fmt::Debug for SnapshotArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotArray")
            .field("len", &self.len())
            .field("dirty", &self.is_dirty())
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
    fn test_new_array_is_uniform_and_clean() {
        let array = SnapshotArray::new(130, 9u16);
        assert_eq!(array.len(), 130);
        assert!(!array.is_dirty());
        assert!(array.stable_values().iter().all(|&v| v == 9));
    }

    #[test]
    fn test_out_of_range_access_returns_none() {
        let array = SnapshotArray::new(4, 0u8);
        assert_eq!(array.get(4), None);
        assert_eq!(array.get_live(100), None);
        assert_eq!(array.set(4, 1), None);
        assert!(!array.compare_and_set(4, 0, 1));
        assert!(!array.is_dirty());
    }

    #[test]
    fn test_copy_publishes_only_dirty_slots() {
        let array = SnapshotArray::new(200, 0u32);
        array.set(0, 10);
        array.set(63, 11);
        array.set(64, 12);
        array.set(199, 13);
        array.set(63, 14);

        assert_eq!(array.get(63), Some(0));
        assert_eq!(array.get_live(63), Some(14));

        assert_eq!(array.copy_snapshot(), 4);
        assert_eq!(array.get(0), Some(10));
        assert_eq!(array.get(63), Some(14));
        assert_eq!(array.get(64), Some(12));
        assert_eq!(array.get(199), Some(13));
        assert_eq!(array.get(1), Some(0));
        assert!(!array.is_dirty());

        assert_eq!(array.copy_snapshot(), 0);
    }

    #[test]
    fn test_from_values_seeds_both_buffers() {
        let values: Vec<u8> = (0..70).collect();
        let array = SnapshotArray::from_values(&values);
        assert_eq!(array.stable_values(), values);
        assert_eq!(array.live_values(), values);
    }

    #[test]
    fn test_set_returns_previous_live_value() {
        let array = SnapshotArray::new(8, 1i16);
        assert_eq!(array.set(3, 5), Some(1));
        assert_eq!(array.set(3, 6), Some(5));
        assert_eq!(array.get(3), Some(1));
    }

    #[test]
    fn test_readers_never_observe_intermediate_values() {
        let array = std::sync::Arc::new(SnapshotArray::new(64, 0u64));
        let reader = {
            let array = std::sync::Arc::clone(&array);
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    let v = array.get(7).unwrap_or(u64::MAX);
                    // Only values published by a copy (multiples of 100) are visible.
                    assert_eq!(v % 100, 0, "observed unpublished value {v}");
                }
            })
        };
        for tick in 1..=200u64 {
            for step in 1..100 {
                array.set(7, tick * 100 + step);
            }
            array.set(7, tick * 100);
            array.copy_snapshot();
        }
        reader.join().expect("reader thread panicked");
    }
}
