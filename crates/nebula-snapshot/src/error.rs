//! Snapshot error types.

use std::thread::ThreadId;

/// Errors raised by [`SnapshotManager`](crate::SnapshotManager).
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Publication was attempted from a thread other than the bound owner.
    #[error("snapshot copy attempted from {caller:?}, owner is {owner:?}")]
    NotOwner {
        /// The thread bound as owner.
        owner: ThreadId,
        /// The thread that attempted the copy.
        caller: ThreadId,
    },

    /// The manager is already bound to a different owner thread.
    #[error("snapshot manager already bound to {0:?}")]
    AlreadyBound(ThreadId),
}
