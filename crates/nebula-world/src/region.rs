//! A `REGION_SIZE³` cube of chunks: the unit of concurrent simulation.
//!
//! Each region owns one [`SnapshotManager`] covering all of its chunks and one
//! [`TickExecutor`] running its tick callbacks. Chunk slots are filled lazily
//! with insert-if-absent, so concurrent loads of the same chunk converge on a
//! single instance. Once its source removes it, a region is closed: it hands
//! out no new chunks and accepts no block changes.
//!
//! Stage layout per tick:
//!
//! | stage | work |
//! |-------|------|
//! | 0 | queued block changes, regeneration, physics updates, one queued unload |
//! | 1 | population of freshly generated chunks |

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use nebula_snapshot::SnapshotManager;
use rustc_hash::FxHashSet;

use crate::chunk::{Chunk, SaveMark};
use crate::context::WorldContext;
use crate::coords::{ChunkCoord, RegionCoord};
use crate::error::TickError;
use crate::material::BlockMaterial;
use crate::scheduler::{TickExecutor, TickWorker};
use crate::store::ChunkPayload;

/// Number of tick stages a region runs.
pub const STAGES: u32 = 2;

/// Identity of one region instance.
///
/// A coordinate can be reused by a later region after removal; the id tells
/// the two instances apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub u64);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How far a lookup may go when the target is not in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOption {
    /// Only return what is already loaded. Never blocks.
    NoLoad,
    /// Load from storage if present, never generate.
    LoadOnly,
    /// Load from storage, falling back to generation.
    LoadOrGenerate,
}

impl LoadOption {
    /// Returns `true` if a miss may trigger a load.
    pub fn load_if_needed(self) -> bool {
        !matches!(self, Self::NoLoad)
    }

    /// Returns `true` if a storage miss may trigger generation.
    pub fn generate_if_needed(self) -> bool {
        matches!(self, Self::LoadOrGenerate)
    }
}

/// A delayed block write applied by the region worker in stage 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockChange {
    /// World block X.
    pub x: i32,
    /// World block Y.
    pub y: i32,
    /// World block Z.
    pub z: i32,
    /// New material id.
    pub id: u16,
    /// New material data.
    pub data: u8,
}

/// Request to drop an empty region from its source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RemovalRequest {
    pub coord: RegionCoord,
    pub id: RegionId,
}

/// Multi-producer queue owned by the region and drained on its worker.
struct WorkQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> WorkQueue<T> {
    fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    fn push(&self, item: T) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(item);
    }

    fn drain(&self) -> crossbeam_channel::TryIter<'_, T> {
        self.rx.try_iter()
    }

    fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// A cube of chunk slots with its own snapshot manager and tick worker.
pub struct Region {
    id: RegionId,
    coord: RegionCoord,
    context: Arc<WorldContext>,
    snapshots: SnapshotManager,
    chunks: DashMap<usize, Arc<Chunk>>,
    active_chunks: AtomicUsize,
    marks: WorkQueue<SaveMark>,
    block_changes: WorkQueue<BlockChange>,
    physics_updates: WorkQueue<(i32, i32, i32)>,
    regenerations: WorkQueue<ChunkCoord>,
    unloads: WorkQueue<ChunkCoord>,
    modified: Mutex<Vec<ChunkCoord>>,
    unload_requested: AtomicBool,
    removal_requested: AtomicBool,
    /// Set once by the source when it drops the region. Writers that add
    /// chunks or block changes hold the read side.
    closed: RwLock<bool>,
    removals: Sender<RemovalRequest>,
    executor: TickExecutor,
}

impl Region {
    pub(crate) fn new(
        id: RegionId,
        coord: RegionCoord,
        context: Arc<WorldContext>,
        removals: Sender<RemovalRequest>,
    ) -> Self {
        let executor = TickExecutor::new(format!(
            "region-{}-{}.{}.{}",
            context.name, coord.x, coord.y, coord.z
        ));
        Self {
            id,
            coord,
            context,
            snapshots: SnapshotManager::new(),
            chunks: DashMap::new(),
            active_chunks: AtomicUsize::new(0),
            marks: WorkQueue::new(),
            block_changes: WorkQueue::new(),
            physics_updates: WorkQueue::new(),
            regenerations: WorkQueue::new(),
            unloads: WorkQueue::new(),
            modified: Mutex::new(Vec::new()),
            unload_requested: AtomicBool::new(false),
            removal_requested: AtomicBool::new(false),
            closed: RwLock::new(false),
            removals,
            executor,
        }
    }

    /// Spawns this region's tick worker.
    pub(crate) fn start(self: &Arc<Self>) -> Result<(), TickError> {
        self.executor.start(Arc::clone(self) as Arc<dyn TickWorker>)
    }

    /// Instance id.
    pub fn id(&self) -> RegionId {
        self.id
    }

    /// Region-grid coordinate.
    pub fn coord(&self) -> RegionCoord {
        self.coord
    }

    /// Shared world collaborators.
    pub fn context(&self) -> &Arc<WorldContext> {
        &self.context
    }

    /// The executor driving this region.
    pub fn executor(&self) -> &TickExecutor {
        &self.executor
    }

    /// The snapshot manager publishing this region's chunks.
    pub fn snapshot_manager(&self) -> &SnapshotManager {
        &self.snapshots
    }

    // -- Chunk access ------------------------------------------------------

    /// Returns the chunk at `coord`, loading or generating it if `option`
    /// allows.
    ///
    /// Returns `None` if `coord` lies outside this region, if the chunk is
    /// absent and `option` forbids loading, if storage has nothing and
    /// generation is not allowed, or if the region is closed. Storage failures
    /// are logged and treated as absent.
    pub fn get_chunk(&self, coord: ChunkCoord, option: LoadOption) -> Option<Arc<Chunk>> {
        if !self.coord.contains(coord) {
            return None;
        }
        let slot = coord.region_slot();
        if let Some(chunk) = self.chunks.get(&slot) {
            return Some(Arc::clone(chunk.value()));
        }
        if !option.load_if_needed() {
            return None;
        }

        let payload = self.load_payload(coord, option)?;

        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return None;
        }
        let chunk = match self.chunks.entry(slot) {
            Entry::Occupied(existing) => return Some(Arc::clone(existing.get())),
            Entry::Vacant(vacant) => {
                let chunk = Arc::new(Chunk::new(
                    coord,
                    &payload,
                    &self.snapshots,
                    self.marks.tx.clone(),
                ));
                vacant.insert(Arc::clone(&chunk));
                self.active_chunks.fetch_add(1, Ordering::AcqRel);
                chunk
            }
        };
        drop(closed);
        tracing::trace!("Loaded {} into {}", coord, self.coord);
        Some(chunk)
    }

    /// Returns the chunk at local position `(x, y, z)` inside this region.
    ///
    /// Returns `None` when the position is outside `[0, REGION_SIZE)`.
    pub fn get_chunk_local(&self, x: i32, y: i32, z: i32, option: LoadOption) -> Option<Arc<Chunk>> {
        let coord = self.coord.chunk(x, y, z)?;
        self.get_chunk(coord, option)
    }

    /// Returns the chunk containing world block `(x, y, z)`.
    pub fn get_chunk_from_block(
        &self,
        x: i32,
        y: i32,
        z: i32,
        option: LoadOption,
    ) -> Option<Arc<Chunk>> {
        self.get_chunk(ChunkCoord::from_block(x, y, z), option)
    }

    /// Returns `true` if the chunk is loaded in this region.
    pub fn has_chunk(&self, coord: ChunkCoord) -> bool {
        self.coord.contains(coord) && self.chunks.contains_key(&coord.region_slot())
    }

    /// Number of loaded chunks.
    pub fn loaded_chunk_count(&self) -> usize {
        self.active_chunks.load(Ordering::Acquire)
    }

    /// Returns `true` if no chunks are loaded.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Returns `true` once the region has been dropped by its source.
    pub fn is_closed(&self) -> bool {
        *self.closed.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Closes the region if it holds no chunks and no queued block changes.
    ///
    /// Returns `true` if the region is closed afterwards.
    pub(crate) fn try_close(&self) -> bool {
        let mut closed = self.closed.write().unwrap_or_else(PoisonError::into_inner);
        if !*closed && self.chunks.is_empty() && self.block_changes.is_empty() {
            *closed = true;
        }
        *closed
    }

    /// All loaded chunks.
    pub fn chunks(&self) -> Vec<Arc<Chunk>> {
        self.chunks.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    fn load_payload(&self, coord: ChunkCoord, option: LoadOption) -> Option<ChunkPayload> {
        match self.context.store.read(coord) {
            Ok(Some(payload)) => return Some(payload),
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to load {}: {}; treating as absent", coord, e),
        }
        if option.generate_if_needed() {
            Some(self.context.generator.generate(coord, self.context.seed))
        } else {
            None
        }
    }

    /// Stable material id at world block `(x, y, z)`, or `None` if the chunk
    /// is not loaded. Never loads.
    pub fn get_block_id(&self, x: i32, y: i32, z: i32) -> Option<u16> {
        self.get_chunk_from_block(x, y, z, LoadOption::NoLoad)
            .map(|chunk| chunk.get_block_id(x, y, z))
    }

    /// Stable material at world block `(x, y, z)`, or `None` if the chunk is
    /// not loaded. Never loads.
    pub fn get_block_material(&self, x: i32, y: i32, z: i32) -> Option<&BlockMaterial> {
        self.get_chunk_from_block(x, y, z, LoadOption::NoLoad)
            .map(|chunk| chunk.get_block_material(&self.context.materials, x, y, z))
    }

    // -- Save / unload -----------------------------------------------------

    /// Queues every loaded chunk for saving.
    pub fn save(&self) {
        for chunk in self.chunks() {
            chunk.save_no_mark();
        }
        self.marks.push(SaveMark::All);
    }

    /// Queues one chunk for saving. Returns `false` if it is not loaded.
    pub fn save_chunk(&self, coord: ChunkCoord) -> bool {
        self.get_chunk(coord, LoadOption::NoLoad)
            .is_some_and(|chunk| chunk.save())
    }

    /// Queues every chunk for unloading and the region for removal.
    pub fn unload(&self, save: bool) {
        for chunk in self.chunks() {
            chunk.unload_no_mark(save);
        }
        self.unload_requested.store(true, Ordering::Release);
        self.marks.push(SaveMark::All);
    }

    /// Queues one chunk for unloading. Returns `false` if it is not loaded.
    pub fn unload_chunk(&self, coord: ChunkCoord, save: bool) -> bool {
        self.get_chunk(coord, LoadOption::NoLoad)
            .is_some_and(|chunk| chunk.unload(save))
    }

    /// Removes `chunk` from its slot if it is still the occupant.
    ///
    /// Returns `true` if the region became empty.
    fn remove_chunk(&self, chunk: &Arc<Chunk>) -> bool {
        let slot = chunk.coord().region_slot();
        if self
            .chunks
            .remove_if(&slot, |_, current| Arc::ptr_eq(current, chunk))
            .is_none()
        {
            return false;
        }
        chunk.set_unloaded(&self.snapshots);
        let remaining = self.active_chunks.fetch_sub(1, Ordering::AcqRel) - 1;
        tracing::trace!("Unloaded {} from {}, {} remain", chunk.coord(), self.coord, remaining);
        remaining == 0
    }

    fn sync_save(&self, chunk: &Chunk) {
        let payload = chunk.snapshot_payload();
        if let Err(e) = self.context.store.write(chunk.coord(), &payload) {
            tracing::error!("Failed to save {}: {}", chunk.coord(), e);
        }
    }

    /// Processes queued save and unload marks against the freshly published
    /// stable state.
    fn process_marks(&self) {
        let mut all = false;
        let mut marked = FxHashSet::default();
        for mark in self.marks.drain() {
            match mark {
                SaveMark::All => all = true,
                SaveMark::Chunk(coord) => {
                    marked.insert(coord);
                }
            }
        }
        let unload_requested = self.unload_requested.swap(false, Ordering::AcqRel);
        if !all && marked.is_empty() && !unload_requested {
            return;
        }

        let targets: Vec<Arc<Chunk>> = if all {
            self.chunks()
        } else {
            marked
                .into_iter()
                .filter_map(|coord| self.get_chunk(coord, LoadOption::NoLoad))
                .collect()
        };

        let mut emptied = false;
        for chunk in targets {
            let state = chunk.get_and_reset_save_state();
            if state.is_save() {
                self.sync_save(&chunk);
            }
            if state.is_unload() && self.remove_chunk(&chunk) {
                emptied = true;
            }
        }

        if (emptied || unload_requested) && self.is_empty() {
            self.request_removal();
        }
    }

    /// Schedules this region for removal at the next safe point.
    pub(crate) fn request_removal(&self) {
        if self.removal_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("{} {} is empty, scheduling removal", self.coord, self.id);
        let _ = self.removals.send(RemovalRequest {
            coord: self.coord,
            id: self.id,
        });
    }

    /// Allows a later emptiness to schedule removal again.
    pub(crate) fn clear_removal_request(&self) {
        self.removal_requested.store(false, Ordering::Release);
    }

    // -- Queued work -------------------------------------------------------

    /// Queues a delayed block write for stage 0 of the next tick.
    ///
    /// Returns `false` if the block lies outside this region or the region is
    /// closed.
    pub fn queue_block_change(&self, change: BlockChange) -> bool {
        if !self
            .coord
            .contains(ChunkCoord::from_block(change.x, change.y, change.z))
        {
            return false;
        }
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return false;
        }
        self.block_changes.push(change);
        true
    }

    /// Queues a physics update for the block at world `(x, y, z)`.
    pub fn queue_block_update(&self, x: i32, y: i32, z: i32) -> bool {
        if !self.coord.contains(ChunkCoord::from_block(x, y, z)) {
            return false;
        }
        self.physics_updates.push((x, y, z));
        true
    }

    /// Queues regeneration of a loaded chunk for stage 0 of the next tick.
    pub fn queue_regeneration(&self, coord: ChunkCoord) -> bool {
        if !self.coord.contains(coord) {
            return false;
        }
        self.regenerations.push(coord);
        true
    }

    /// Queues a chunk for unloading; at most one queued unload runs per tick.
    pub fn queue_unload(&self, coord: ChunkCoord) -> bool {
        if !self.coord.contains(coord) {
            return false;
        }
        self.unloads.push(coord);
        true
    }

    /// Chunks modified since the last drain, as collected by the pre-snapshot
    /// phase.
    pub fn drain_modified_chunks(&self) -> Vec<ChunkCoord> {
        std::mem::take(&mut *self.modified.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn apply_block_changes(&self) {
        for change in self.block_changes.drain() {
            let coord = ChunkCoord::from_block(change.x, change.y, change.z);
            match self.get_chunk(coord, LoadOption::LoadOrGenerate) {
                Some(chunk) => {
                    chunk.set_block(change.x, change.y, change.z, change.id, change.data);
                    self.physics_updates.push((change.x, change.y, change.z));
                }
                None => tracing::warn!("Dropped block change in unavailable {}", coord),
            }
        }
    }

    fn apply_regenerations(&self) {
        for coord in self.regenerations.drain() {
            match self.get_chunk(coord, LoadOption::NoLoad) {
                Some(chunk) => {
                    let payload = self.context.generator.generate(coord, self.context.seed);
                    chunk.apply_payload(&payload);
                    tracing::debug!("Regenerated {}", coord);
                }
                None => tracing::debug!("Skipped regeneration of unloaded {}", coord),
            }
        }
    }

    fn apply_physics_updates(&self) {
        let pending: FxHashSet<(i32, i32, i32)> = self.physics_updates.drain().collect();
        let Some(physics) = &self.context.physics else {
            return;
        };
        for (x, y, z) in pending {
            let Some(chunk) = self.get_chunk_from_block(x, y, z, LoadOption::NoLoad) else {
                continue;
            };
            let material = chunk.get_block_material_live(&self.context.materials, x, y, z);
            if material.has_physics {
                physics.on_update(self, material, x, y, z);
            }
        }
    }

    fn apply_one_unload(&self) {
        if let Some(coord) = self.unloads.drain().next()
            && let Some(chunk) = self.get_chunk(coord, LoadOption::NoLoad)
        {
            chunk.unload(true);
        }
    }

    fn populate_chunks(&self) {
        for chunk in self.chunks() {
            if chunk.is_loaded() && !chunk.is_populated_live() {
                self.context.generator.populate(&chunk, self.context.seed);
                chunk.mark_populated();
            }
        }
    }
}

impl TickWorker for Region {
    fn on_start(&self) {
        if let Err(e) = self.snapshots.bind_owner() {
            tracing::error!("{}: {}", self.coord, e);
        }
    }

    fn pre_snapshot_run(&self) -> Result<(), TickError> {
        let mut dirty: Vec<ChunkCoord> = self
            .chunks
            .iter()
            .filter(|entry| entry.value().take_modified())
            .map(|entry| entry.value().coord())
            .collect();
        if !dirty.is_empty() {
            self.modified
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .append(&mut dirty);
        }
        Ok(())
    }

    fn start_tick_run(&self, stage: u32, _delta: Duration) -> Result<(), TickError> {
        match stage {
            0 => {
                self.apply_block_changes();
                self.apply_regenerations();
                self.apply_physics_updates();
                self.apply_one_unload();
                Ok(())
            }
            1 => {
                self.populate_chunks();
                Ok(())
            }
            _ => Err(TickError::InvalidStage {
                stage,
                stages: STAGES,
            }),
        }
    }

    fn copy_snapshot_run(&self) -> Result<(), TickError> {
        self.snapshots.copy_all_snapshots()?;
        self.process_marks();
        Ok(())
    }

    fn halt_run(&self) -> Result<(), TickError> {
        // Pending saves still refer to published state; flush them.
        let mut flushed = 0;
        for chunk in self.chunks() {
            if chunk.get_and_reset_save_state().is_save() {
                self.sync_save(&chunk);
                flushed += 1;
            }
        }
        tracing::debug!("{} {} halted, flushed {} saves", self.coord, self.id, flushed);
        Ok(())
    }

    fn stages(&self) -> u32 {
        STAGES
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id)
            .field("coord", &self.coord)
            .field("chunks", &self.loaded_chunk_count())
            .field("executor", &self.executor.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
