//! Chunk content generators.
//!
//! Generation is an opaque collaborator of the world: given a chunk
//! coordinate and the world seed it produces a full [`ChunkPayload`].
//! Generators must be deterministic so a regenerated chunk matches the
//! original.

use crate::chunk::Chunk;
use crate::coords::{CHUNK_SIZE, ChunkCoord, block_index};
use crate::material::{AIR, DIRT, GRASS, STONE};
use crate::store::ChunkPayload;

/// Produces chunk content for coordinates that have never been stored.
pub trait WorldGenerator: Send + Sync {
    /// Generates the base content of a chunk.
    fn generate(&self, coord: ChunkCoord, seed: u64) -> ChunkPayload;

    /// Decorates a freshly generated chunk on its region worker.
    ///
    /// Runs once per chunk, before the chunk is marked populated.
    fn populate(&self, _chunk: &Chunk, _seed: u64) {}

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Generates nothing but air.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyGenerator;

impl WorldGenerator for EmptyGenerator {
    fn generate(&self, _coord: ChunkCoord, _seed: u64) -> ChunkPayload {
        ChunkPayload::empty()
    }

    fn name(&self) -> &str {
        "empty"
    }
}

/// Generates flat terrain: stone, then dirt, then one layer of grass.
#[derive(Clone, Copy, Debug)]
pub struct FlatGenerator {
    /// World Y of the first air block above the grass layer.
    pub surface_height: i32,
    /// Thickness of the dirt layer under the grass.
    pub dirt_depth: i32,
}

impl FlatGenerator {
    /// Creates a flat generator with the given surface height.
    pub fn new(surface_height: i32) -> Self {
        Self {
            surface_height,
            dirt_depth: 3,
        }
    }

    /// Material id at world height `y`.
    pub fn material_at(&self, y: i32) -> u16 {
        let grass = self.surface_height - 1;
        if y >= self.surface_height {
            AIR
        } else if y == grass {
            GRASS
        } else if y >= grass - self.dirt_depth {
            DIRT
        } else {
            STONE
        }
    }
}

impl Default for FlatGenerator {
    fn default() -> Self {
        Self::new(64)
    }
}

impl WorldGenerator for FlatGenerator {
    fn generate(&self, coord: ChunkCoord, _seed: u64) -> ChunkPayload {
        let mut payload = ChunkPayload::empty();
        let (_, base_y, _) = coord.block_origin();
        for ly in 0..CHUNK_SIZE {
            let id = self.material_at(base_y + ly);
            if id == AIR {
                continue;
            }
            for lx in 0..CHUNK_SIZE {
                for lz in 0..CHUNK_SIZE {
                    payload.block_ids[block_index(lx, ly, lz)] = id;
                }
            }
        }
        payload
    }

    fn name(&self) -> &str {
        "flat"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
