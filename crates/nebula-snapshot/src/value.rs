//! Scalar payloads that can be published with a single atomic store.

use std::fmt::Debug;
use std::sync::atomic::{
    AtomicBool, AtomicI8, AtomicI16, AtomicI32, AtomicI64, AtomicU8, AtomicU16, AtomicU32,
    AtomicU64, AtomicUsize, Ordering,
};

/// A `Copy` payload with a lock-free, word-sized atomic representation.
///
/// Publication of a snapshot slot is a single [`store`](Self::store), so a
/// reader can never observe a torn value.
pub trait SnapshotValue: Copy + PartialEq + Debug + Send + Sync + 'static {
    /// Atomic storage backing one slot.
    type Atomic: Send + Sync;

    /// Creates a new atomic slot holding `value`.
    fn new_atomic(value: Self) -> Self::Atomic;

    /// Loads the slot.
    fn load(slot: &Self::Atomic, order: Ordering) -> Self;

    /// Stores `value` into the slot.
    fn store(slot: &Self::Atomic, value: Self, order: Ordering);

    /// Stores `value` and returns the previous contents.
    fn swap(slot: &Self::Atomic, value: Self, order: Ordering) -> Self;

    /// Replaces `current` with `new` if the slot still holds `current`.
    ///
    /// Returns the previous value on success and the observed value on failure.
    fn compare_exchange(slot: &Self::Atomic, current: Self, new: Self) -> Result<Self, Self>;
}

macro_rules! impl_snapshot_value {
    ($($ty:ty => $atomic:ty),* $(,)?) => {
        $(
            impl SnapshotValue for $ty {
                type Atomic = $atomic;

                #[inline]
                fn new_atomic(value: Self) -> Self::Atomic {
                    <$atomic>::new(value)
                }

                #[inline]
                fn load(slot: &Self::Atomic, order: Ordering) -> Self {
                    slot.load(order)
                }

                #[inline]
                fn store(slot: &Self::Atomic, value: Self, order: Ordering) {
                    slot.store(value, order)
                }

                #[inline]
                fn swap(slot: &Self::Atomic, value: Self, order: Ordering) -> Self {
                    slot.swap(value, order)
                }

                #[inline]
                fn compare_exchange(
                    slot: &Self::Atomic,
                    current: Self,
                    new: Self,
                ) -> Result<Self, Self> {
                    slot.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
                }
            }
        )*
    };
}

impl_snapshot_value! {
    bool => AtomicBool,
    u8 => AtomicU8,
    u16 => AtomicU16,
    u32 => AtomicU32,
    u64 => AtomicU64,
    usize => AtomicUsize,
    i8 => AtomicI8,
    i16 => AtomicI16,
    i32 => AtomicI32,
    i64 => AtomicI64,
}
