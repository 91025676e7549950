//! A `CHUNK_SIZE³` cube of blocks backed by snapshot arrays.
//!
//! Reads default to the stable (previous-tick) view. Writes go to the live
//! buffer and return the previous *stable* value, so the writing worker sees
//! its change immediately through the `_live` getters while every other thread
//! sees it only after the owning region publishes its snapshot.
//!
//! Saving and unloading are requests: they move the chunk's save state and
//! queue a mark on the owning region, which performs the work right after the
//! next publication.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crossbeam_channel::Sender;
use nebula_snapshot::{SnapshotArray, SnapshotCell, SnapshotKey, SnapshotManager};

use crate::coords::{CHUNK_VOLUME, ChunkCoord, block_index};
use crate::material::{AIR, BlockMaterial, MaterialRegistry};
use crate::store::ChunkPayload;

/// Pending persistence work on a chunk.
///
/// Transitions only move towards "more work" until the owning region consumes
/// the state with [`Chunk::get_and_reset_save_state`]. `Unloaded` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SaveState {
    /// No work pending.
    None = 0,
    /// Write the chunk after the next publication.
    Save = 1,
    /// Remove the chunk after the next publication.
    Unload = 2,
    /// Write, then remove.
    UnloadSave = 3,
    /// The chunk has been removed from its region.
    Unloaded = 4,
}

impl SaveState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Save,
            2 => Self::Unload,
            3 => Self::UnloadSave,
            4 => Self::Unloaded,
            _ => Self::None,
        }
    }

    /// Returns `true` if the chunk must be written.
    pub fn is_save(self) -> bool {
        matches!(self, Self::Save | Self::UnloadSave)
    }

    /// Returns `true` if the chunk must be removed.
    pub fn is_unload(self) -> bool {
        matches!(self, Self::Unload | Self::UnloadSave)
    }
}

/// Work queued on a region for its next copy-snapshot phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SaveMark {
    /// Process one chunk.
    Chunk(ChunkCoord),
    /// Process every chunk in the region.
    All,
}

/// A cube of blocks owned by one region.
pub struct Chunk {
    coord: ChunkCoord,
    block_ids: Arc<SnapshotArray<u16>>,
    block_data: Arc<SnapshotArray<u8>>,
    populated: Arc<SnapshotCell<bool>>,
    keys: [SnapshotKey; 3],
    save_state: AtomicU8,
    modified: AtomicBool,
    marks: Sender<SaveMark>,
}

impl Chunk {
    /// Builds a chunk from `payload` and registers its cells with `snapshots`.
    ///
    /// An invalid payload is replaced by an empty chunk.
    pub(crate) fn new(
        coord: ChunkCoord,
        payload: &ChunkPayload,
        snapshots: &SnapshotManager,
        marks: Sender<SaveMark>,
    ) -> Self {
        let (block_ids, block_data, populated) = if payload.is_valid() {
            (
                SnapshotArray::from_values(&payload.block_ids),
                SnapshotArray::from_values(&payload.block_data),
                payload.populated,
            )
        } else {
            tracing::warn!(
                "Chunk payload for {} has {} blocks, expected {}; using empty chunk",
                coord,
                payload.block_ids.len(),
                CHUNK_VOLUME
            );
            (
                SnapshotArray::new(CHUNK_VOLUME, AIR),
                SnapshotArray::new(CHUNK_VOLUME, 0),
                false,
            )
        };

        let block_ids = Arc::new(block_ids);
        let block_data = Arc::new(block_data);
        let populated = Arc::new(SnapshotCell::new(populated));
        let keys = [
            snapshots.register(block_ids.clone()),
            snapshots.register(block_data.clone()),
            snapshots.register(populated.clone()),
        ];

        Self {
            coord,
            block_ids,
            block_data,
            populated,
            keys,
            save_state: AtomicU8::new(SaveState::None as u8),
            modified: AtomicBool::new(false),
            marks,
        }
    }

    /// Chunk-grid coordinate.
    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    // -- Reads -------------------------------------------------------------

    /// Stable material id at block `(x, y, z)`. Only the low four bits of
    /// each coordinate are used.
    pub fn get_block_id(&self, x: i32, y: i32, z: i32) -> u16 {
        self.block_ids.get(block_index(x, y, z)).unwrap_or(AIR)
    }

    /// Live material id at block `(x, y, z)`.
    pub fn get_block_id_live(&self, x: i32, y: i32, z: i32) -> u16 {
        self.block_ids.get_live(block_index(x, y, z)).unwrap_or(AIR)
    }

    /// Stable material data at block `(x, y, z)`.
    pub fn get_block_data(&self, x: i32, y: i32, z: i32) -> u8 {
        self.block_data.get(block_index(x, y, z)).unwrap_or(0)
    }

    /// Live material data at block `(x, y, z)`.
    pub fn get_block_data_live(&self, x: i32, y: i32, z: i32) -> u8 {
        self.block_data.get_live(block_index(x, y, z)).unwrap_or(0)
    }

    /// Resolves the stable block at `(x, y, z)` to its material.
    pub fn get_block_material<'a>(
        &self,
        registry: &'a MaterialRegistry,
        x: i32,
        y: i32,
        z: i32,
    ) -> &'a BlockMaterial {
        registry.resolve(self.get_block_id(x, y, z), self.get_block_data(x, y, z))
    }

    /// Resolves the live block at `(x, y, z)` to its material.
    pub fn get_block_material_live<'a>(
        &self,
        registry: &'a MaterialRegistry,
        x: i32,
        y: i32,
        z: i32,
    ) -> &'a BlockMaterial {
        registry.resolve(
            self.get_block_id_live(x, y, z),
            self.get_block_data_live(x, y, z),
        )
    }

    // -- Writes ------------------------------------------------------------

    /// Writes the live material id. Returns the previous stable id.
    ///
    /// Writes to an unloaded chunk are dropped.
    pub fn set_block_id(&self, x: i32, y: i32, z: i32, id: u16) -> u16 {
        let index = block_index(x, y, z);
        let previous = self.block_ids.get(index).unwrap_or(AIR);
        if self.check_loaded() {
            self.block_ids.set(index, id);
            self.modified.store(true, Ordering::Release);
        }
        previous
    }

    /// Writes the live material data. Returns the previous stable data.
    pub fn set_block_data(&self, x: i32, y: i32, z: i32, data: u8) -> u8 {
        let index = block_index(x, y, z);
        let previous = self.block_data.get(index).unwrap_or(0);
        if self.check_loaded() {
            self.block_data.set(index, data);
            self.modified.store(true, Ordering::Release);
        }
        previous
    }

    /// Writes both id and data. Returns the previous stable pair.
    pub fn set_block(&self, x: i32, y: i32, z: i32, id: u16, data: u8) -> (u16, u8) {
        (
            self.set_block_id(x, y, z, id),
            self.set_block_data(x, y, z, data),
        )
    }

    /// Overwrites every live block with the contents of `payload`.
    pub(crate) fn apply_payload(&self, payload: &ChunkPayload) {
        if !payload.is_valid() || !self.check_loaded() {
            return;
        }
        for index in 0..CHUNK_VOLUME {
            if self.block_ids.get_live(index) != Some(payload.block_ids[index]) {
                self.block_ids.set(index, payload.block_ids[index]);
            }
            if self.block_data.get_live(index) != Some(payload.block_data[index]) {
                self.block_data.set(index, payload.block_data[index]);
            }
        }
        self.modified.store(true, Ordering::Release);
    }

    fn check_loaded(&self) -> bool {
        if self.is_loaded() {
            true
        } else {
            tracing::warn!("Write to unloaded {} dropped", self.coord);
            false
        }
    }

    // -- Population --------------------------------------------------------

    /// Stable populated flag.
    pub fn is_populated(&self) -> bool {
        self.populated.get()
    }

    /// Live populated flag.
    pub fn is_populated_live(&self) -> bool {
        self.populated.get_live()
    }

    /// Marks the chunk populated from the next tick on.
    pub fn mark_populated(&self) {
        self.populated.set(true);
    }

    // -- Save / unload -----------------------------------------------------

    /// Current save state.
    pub fn save_state(&self) -> SaveState {
        SaveState::from_u8(self.save_state.load(Ordering::Acquire))
    }

    /// Returns `false` once the chunk has been removed from its region.
    pub fn is_loaded(&self) -> bool {
        self.save_state() != SaveState::Unloaded
    }

    /// Requests that the chunk be written after the next publication.
    ///
    /// Returns `false` if the chunk is already unloaded.
    pub fn save(&self) -> bool {
        if !self.save_no_mark() {
            return false;
        }
        self.mark();
        true
    }

    /// Requests that the chunk be removed after the next publication,
    /// optionally writing it first.
    pub fn unload(&self, save: bool) -> bool {
        if !self.unload_no_mark(save) {
            return false;
        }
        self.mark();
        true
    }

    pub(crate) fn save_no_mark(&self) -> bool {
        self.transition(|state| match state {
            SaveState::None | SaveState::Save => SaveState::Save,
            SaveState::Unload | SaveState::UnloadSave => SaveState::UnloadSave,
            SaveState::Unloaded => SaveState::Unloaded,
        })
    }

    pub(crate) fn unload_no_mark(&self, save: bool) -> bool {
        self.transition(|state| match state {
            SaveState::None | SaveState::Unload if save => SaveState::UnloadSave,
            SaveState::None | SaveState::Unload => SaveState::Unload,
            SaveState::Save | SaveState::UnloadSave => SaveState::UnloadSave,
            SaveState::Unloaded => SaveState::Unloaded,
        })
    }

    /// Applies `next` with a CAS loop. Returns `false` if the chunk is unloaded.
    fn transition(&self, next: impl Fn(SaveState) -> SaveState) -> bool {
        let mut current = self.save_state.load(Ordering::Acquire);
        loop {
            let state = SaveState::from_u8(current);
            if state == SaveState::Unloaded {
                return false;
            }
            match self.save_state.compare_exchange_weak(
                current,
                next(state) as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Returns the pending state and resets it to `None`.
    ///
    /// An unloaded chunk stays unloaded.
    pub fn get_and_reset_save_state(&self) -> SaveState {
        let mut current = self.save_state.load(Ordering::Acquire);
        loop {
            let state = SaveState::from_u8(current);
            if state == SaveState::Unloaded {
                return state;
            }
            match self.save_state.compare_exchange_weak(
                current,
                SaveState::None as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return state,
                Err(observed) => current = observed,
            }
        }
    }

    fn mark(&self) {
        // The region may already be gone; the chunk is then unreachable anyway.
        let _ = self.marks.send(SaveMark::Chunk(self.coord));
    }

    pub(crate) fn set_unloaded(&self, snapshots: &SnapshotManager) {
        self.save_state
            .store(SaveState::Unloaded as u8, Ordering::Release);
        for key in self.keys {
            snapshots.deregister(key);
        }
    }

    // -- Snapshots of the whole chunk --------------------------------------

    /// Copies the stable view into a payload.
    pub fn snapshot_payload(&self) -> ChunkPayload {
        ChunkPayload {
            block_ids: self.block_ids.stable_values(),
            block_data: self.block_data.stable_values(),
            populated: self.populated.get(),
        }
    }

    /// Returns and clears the modified flag.
    pub(crate) fn take_modified(&self) -> bool {
        self.modified.swap(false, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("coord", &self.coord)
            .field("save_state", &self.save_state())
            .field("populated", &self.is_populated())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{GRASS, STONE};
    use crossbeam_channel::{Receiver, unbounded};

    fn make_chunk(payload: &ChunkPayload) -> (Chunk, SnapshotManager, Receiver<SaveMark>) {
        let snapshots = SnapshotManager::new();
        let (tx, rx) = unbounded();
        let chunk = Chunk::new(ChunkCoord::new(1, 2, 3), payload, &snapshots, tx);
        (chunk, snapshots, rx)
    }

    #[test]
    fn test_payload_seeds_stable_view() {
        let mut payload = ChunkPayload::empty();
        payload.block_ids[block_index(4, 5, 6)] = STONE;
        payload.block_data[block_index(4, 5, 6)] = 2;
        payload.populated = true;
        let (chunk, snapshots, _) = make_chunk(&payload);

        assert_eq!(snapshots.len(), 3);
        assert_eq!(chunk.get_block_id(4, 5, 6), STONE);
        assert_eq!(chunk.get_block_data(4, 5, 6), 2);
        assert!(chunk.is_populated());
        assert_eq!(chunk.snapshot_payload(), payload);
    }

    #[test]
    fn test_invalid_payload_becomes_empty_chunk() {
        let payload = ChunkPayload {
            block_ids: vec![STONE; 3],
            block_data: vec![],
            populated: true,
        };
        let (chunk, _, _) = make_chunk(&payload);
        assert_eq!(chunk.get_block_id(0, 0, 0), AIR);
        assert!(!chunk.is_populated());
    }

    #[test]
    fn test_delayed_write_snapshot_read() {
        let (chunk, snapshots, _) = make_chunk(&ChunkPayload::empty());

        assert_eq!(chunk.set_block_id(1, 1, 1, STONE), AIR);
        assert_eq!(chunk.set_block_id(1, 1, 1, GRASS), AIR);
        assert_eq!(chunk.get_block_id(1, 1, 1), AIR);
        assert_eq!(chunk.get_block_id_live(1, 1, 1), GRASS);

        snapshots.copy_all_snapshots().unwrap();
        assert_eq!(chunk.get_block_id(1, 1, 1), GRASS);
        assert_eq!(chunk.set_block(1, 1, 1, STONE, 3), (GRASS, 0));
    }

    #[test]
    fn test_world_coordinates_are_masked() {
        let (chunk, snapshots, _) = make_chunk(&ChunkPayload::empty());
        chunk.set_block_id(17, 34, -1, STONE);
        snapshots.copy_all_snapshots().unwrap();
        assert_eq!(chunk.get_block_id(1, 2, 15), STONE);
    }

    #[test]
    fn test_material_resolution() {
        let registry = MaterialRegistry::with_defaults();
        let (chunk, snapshots, _) = make_chunk(&ChunkPayload::empty());
        chunk.set_block_id(0, 0, 0, 999);
        assert_eq!(chunk.get_block_material(&registry, 0, 0, 0).name, "air");
        assert!(chunk.get_block_material_live(&registry, 0, 0, 0).is_unknown());
        snapshots.copy_all_snapshots().unwrap();
        assert!(chunk.get_block_material(&registry, 0, 0, 0).is_unknown());
    }

    #[test]
    fn test_save_state_machine() {
        let (chunk, _, marks) = make_chunk(&ChunkPayload::empty());
        assert_eq!(chunk.save_state(), SaveState::None);

        assert!(chunk.save());
        assert_eq!(chunk.save_state(), SaveState::Save);
        assert!(chunk.unload(false));
        assert_eq!(chunk.save_state(), SaveState::UnloadSave);
        assert_eq!(marks.try_iter().count(), 2);

        assert_eq!(chunk.get_and_reset_save_state(), SaveState::UnloadSave);
        assert_eq!(chunk.save_state(), SaveState::None);

        assert!(chunk.unload(false));
        assert_eq!(chunk.save_state(), SaveState::Unload);
        assert!(chunk.unload(true));
        assert_eq!(chunk.save_state(), SaveState::UnloadSave);
    }

    #[test]
    fn test_unloaded_is_terminal() {
        let (chunk, snapshots, marks) = make_chunk(&ChunkPayload::empty());
        chunk.set_unloaded(&snapshots);
        assert!(snapshots.is_empty());
        assert!(!chunk.is_loaded());
        assert!(!chunk.save());
        assert!(!chunk.unload(true));
        assert_eq!(chunk.get_and_reset_save_state(), SaveState::Unloaded);
        assert!(marks.try_recv().is_err());

        assert_eq!(chunk.set_block_id(0, 0, 0, STONE), AIR);
        assert_eq!(chunk.get_block_id_live(0, 0, 0), AIR);
    }

    #[test]
    fn test_modified_flag() {
        let (chunk, _, _) = make_chunk(&ChunkPayload::empty());
        assert!(!chunk.take_modified());
        chunk.set_block_data(3, 3, 3, 1);
        assert!(chunk.take_modified());
        assert!(!chunk.take_modified());
    }

    #[test]
    fn test_apply_payload_rewrites_live_view() {
        let (chunk, snapshots, _) = make_chunk(&ChunkPayload::empty());
        chunk.apply_payload(&ChunkPayload::filled(STONE, 1));
        assert_eq!(chunk.get_block_id(9, 9, 9), AIR);
        assert_eq!(snapshots.copy_all_snapshots().unwrap(), 2 * CHUNK_VOLUME);
        assert_eq!(chunk.get_block_id(9, 9, 9), STONE);
        assert_eq!(chunk.get_block_data(9, 9, 9), 1);
    }
}
