//! Mutable world state: chunks, regions, and the staged tick that drives them.
//!
//! A world is partitioned into regions, each a cube of chunks simulated by its
//! own worker thread. Chunk data is double-buffered through
//! [`nebula_snapshot`]: the owning region writes the live view during a tick
//! and publishes it once, in `copy_snapshot_run`, so every other thread reads
//! a consistent previous-tick view without locking.

pub mod chunk;
pub mod context;
pub mod coords;
pub mod error;
pub mod events;
pub mod generator;
pub mod material;
pub mod region;
pub mod region_source;
pub mod scheduler;
pub mod store;
pub mod world;

pub use chunk::{Chunk, SaveState};
pub use context::{BlockPhysics, WorldContext};
pub use coords::{
    BLOCK_TO_REGION_SHIFT, CHUNK_SIZE, CHUNK_SIZE_BITS, CHUNK_VOLUME, ChunkCoord, REGION_SIZE,
    REGION_SIZE_BITS, REGION_VOLUME, RegionCoord, block_index, chunk_slot, unpack_block_index,
};
pub use error::{MaterialError, StoreError, TickError, WorldError};
pub use events::{EventBus, RegionEvent};
pub use generator::{EmptyGenerator, FlatGenerator, WorldGenerator};
pub use material::{BlockMaterial, MaterialRegistry};
pub use region::{BlockChange, LoadOption, Region, RegionId};
pub use region_source::{DEFAULT_WARN_THRESHOLD, RegionSource};
pub use scheduler::{
    ExecutorState, PhaseResult, TickExecutor, TickPhase, TickReport, TickScheduler, TickWorker,
};
pub use store::{ChunkPayload, ChunkStore, FileChunkStore, MemoryChunkStore};
pub use world::{World, WorldSettings};
