//! Error types for the world crate.

use std::path::PathBuf;

use nebula_snapshot::SnapshotError;

use crate::coords::{ChunkCoord, RegionCoord};
use crate::scheduler::ExecutorState;

/// Errors surfaced by [`RegionSource`](crate::RegionSource) and the
/// [`World`](crate::World) façade.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// A freshly created region could not start its tick worker. The region
    /// was discarded and never became reachable.
    #[error("failed to start worker for {coord}")]
    WorkerStart {
        /// Coordinate of the discarded region.
        coord: RegionCoord,
        /// Underlying executor error.
        #[source]
        source: TickError,
    },
}

/// Errors raised by [`ChunkStore`](crate::ChunkStore) implementations.
///
/// Callers inside the world log these and treat the chunk as absent.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem access failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File or directory being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A payload could not be encoded.
    #[error("failed to encode {coord}: {reason}")]
    Encode {
        /// Chunk being written.
        coord: ChunkCoord,
        /// Encoder message.
        reason: String,
    },
    /// Stored bytes could not be decoded or have the wrong shape.
    #[error("corrupt data for {coord}: {reason}")]
    Corrupt {
        /// Chunk being read.
        coord: ChunkCoord,
        /// Description of the problem.
        reason: String,
    },
}

/// Errors raised by tick workers and their executors.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// A stage index beyond the worker's declared stage count was dispatched.
    #[error("stage {stage} out of range, worker has {stages} stages")]
    InvalidStage {
        /// Requested stage.
        stage: u32,
        /// Declared stage count.
        stages: u32,
    },
    /// The executor was not in the state the operation requires.
    #[error("executor in state {found:?}, expected {expected:?}")]
    InvalidState {
        /// Required state.
        expected: ExecutorState,
        /// Observed state.
        found: ExecutorState,
    },
    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread {name}: {source}")]
    Spawn {
        /// Thread name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The command was dropped because the executor is halting.
    #[error("executor halting, command cancelled")]
    Cancelled,
    /// Snapshot publication failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Errors that can occur during material registration.
#[derive(Debug, thiserror::Error)]
pub enum MaterialError {
    /// A material with the same name has already been registered.
    #[error("duplicate material name: {0}")]
    DuplicateName(String),
    /// The `(id, data)` pair is already taken.
    #[error("duplicate material id {id}:{data}")]
    DuplicateId {
        /// Material id.
        id: u16,
        /// Data variant.
        data: u8,
    },
    /// The id is reserved for the unknown-material fallback.
    #[error("material id {0} is reserved")]
    ReservedId(u16),
}
