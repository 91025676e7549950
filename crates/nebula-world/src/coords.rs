//! Spatial constants and integer coordinate types for chunks and regions.
//!
//! Block coordinates are plain `i32` world positions. A chunk is a
//! `CHUNK_SIZE³` cube of blocks and a region is a `REGION_SIZE³` cube of
//! chunks, so converting downwards is an arithmetic right shift that rounds
//! towards negative infinity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Log2 of the chunk edge length in blocks.
pub const CHUNK_SIZE_BITS: u32 = 4;
/// Chunk edge length in blocks.
pub const CHUNK_SIZE: i32 = 1 << CHUNK_SIZE_BITS;
/// Number of blocks in one chunk.
pub const CHUNK_VOLUME: usize = (CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE) as usize;

/// Log2 of the region edge length in chunks.
pub const REGION_SIZE_BITS: u32 = 4;
/// Region edge length in chunks.
pub const REGION_SIZE: i32 = 1 << REGION_SIZE_BITS;
/// Number of chunk slots in one region.
pub const REGION_VOLUME: usize = (REGION_SIZE * REGION_SIZE * REGION_SIZE) as usize;

/// Shift converting a block coordinate directly into a region coordinate.
pub const BLOCK_TO_REGION_SHIFT: u32 = REGION_SIZE_BITS + CHUNK_SIZE_BITS;

const CHUNK_MASK: i32 = CHUNK_SIZE - 1;
const REGION_MASK: i32 = REGION_SIZE - 1;

/// Packs a block position into its storage slot within a chunk.
///
/// Only the low four bits of each component are used, so world coordinates
/// may be passed directly. Layout is `x << 8 | z << 4 | y`.
#[inline]
pub fn block_index(x: i32, y: i32, z: i32) -> usize {
    (((x & CHUNK_MASK) << 8) | ((z & CHUNK_MASK) << 4) | (y & CHUNK_MASK)) as usize
}

/// Inverse of [`block_index`]: returns local `(x, y, z)` in `[0, 16)`.
#[inline]
pub fn unpack_block_index(index: usize) -> (i32, i32, i32) {
    let i = index as i32;
    ((i >> 8) & CHUNK_MASK, i & CHUNK_MASK, (i >> 4) & CHUNK_MASK)
}

/// Packs a local chunk position into its slot within a region.
///
/// Returns `None` when any component lies outside `[0, REGION_SIZE)`.
#[inline]
pub fn chunk_slot(x: i32, y: i32, z: i32) -> Option<usize> {
    let in_range = |v: i32| (0..REGION_SIZE).contains(&v);
    if in_range(x) && in_range(y) && in_range(z) {
        Some(((x << 8) | (z << 4) | y) as usize)
    } else {
        None
    }
}

/// Position of a chunk on the chunk grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    /// Chunk-grid X coordinate.
    pub x: i32,
    /// Chunk-grid Y coordinate.
    pub y: i32,
    /// Chunk-grid Z coordinate.
    pub z: i32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Chunk containing the given block.
    pub fn from_block(x: i32, y: i32, z: i32) -> Self {
        Self::new(
            x >> CHUNK_SIZE_BITS,
            y >> CHUNK_SIZE_BITS,
            z >> CHUNK_SIZE_BITS,
        )
    }

    /// Region containing this chunk.
    pub fn region(self) -> RegionCoord {
        RegionCoord::new(
            self.x >> REGION_SIZE_BITS,
            self.y >> REGION_SIZE_BITS,
            self.z >> REGION_SIZE_BITS,
        )
    }

    /// Position of this chunk inside its region, each component in `[0, 16)`.
    pub fn local(self) -> (i32, i32, i32) {
        (
            self.x & REGION_MASK,
            self.y & REGION_MASK,
            self.z & REGION_MASK,
        )
    }

    /// Storage slot of this chunk inside its region.
    pub fn region_slot(self) -> usize {
        let (x, y, z) = self.local();
        ((x << 8) | (z << 4) | y) as usize
    }

    /// World position of the block at local `(0, 0, 0)`.
    pub fn block_origin(self) -> (i32, i32, i32) {
        (
            self.x << CHUNK_SIZE_BITS,
            self.y << CHUNK_SIZE_BITS,
            self.z << CHUNK_SIZE_BITS,
        )
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Position of a region on the region grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionCoord {
    /// Region-grid X coordinate.
    pub x: i32,
    /// Region-grid Y coordinate.
    pub y: i32,
    /// Region-grid Z coordinate.
    pub z: i32,
}

impl RegionCoord {
    /// Creates a new region coordinate.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Region containing the given block.
    pub fn from_block(x: i32, y: i32, z: i32) -> Self {
        Self::new(
            x >> BLOCK_TO_REGION_SHIFT,
            y >> BLOCK_TO_REGION_SHIFT,
            z >> BLOCK_TO_REGION_SHIFT,
        )
    }

    /// Chunk at local `(x, y, z)` inside this region.
    ///
    /// Returns `None` when the local position is out of range.
    pub fn chunk(self, x: i32, y: i32, z: i32) -> Option<ChunkCoord> {
        chunk_slot(x, y, z)?;
        Some(ChunkCoord::new(
            (self.x << REGION_SIZE_BITS) + x,
            (self.y << REGION_SIZE_BITS) + y,
            (self.z << REGION_SIZE_BITS) + z,
        ))
    }

    /// Returns `true` if `chunk` lies inside this region.
    pub fn contains(self, chunk: ChunkCoord) -> bool {
        chunk.region() == self
    }
}

impl fmt::Display for RegionCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region({}, {}, {})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_index_is_a_bijection() {
        let mut seen = vec![false; CHUNK_VOLUME];
        for x in 0..CHUNK_SIZE {
            for y in 0..CHUNK_SIZE {
                for z in 0..CHUNK_SIZE {
                    let index = block_index(x, y, z);
                    assert!(index < CHUNK_VOLUME);
                    assert!(!seen[index], "({x}, {y}, {z}) aliases slot {index}");
                    seen[index] = true;
                    assert_eq!(unpack_block_index(index), (x, y, z));
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_block_index_masks_world_coordinates() {
        assert_eq!(block_index(17, -1, 33), block_index(1, 15, 1));
        assert_eq!(block_index(1, 2, 3), (1 << 8) | (3 << 4) | 2);
    }

    #[test]
    fn test_negative_blocks_round_down() {
        assert_eq!(ChunkCoord::from_block(-1, 0, 15), ChunkCoord::new(-1, 0, 0));
        assert_eq!(ChunkCoord::from_block(-16, -17, 16), ChunkCoord::new(-1, -2, 1));
        assert_eq!(RegionCoord::from_block(-1, 255, 256), RegionCoord::new(-1, 0, 1));
    }

    #[test]
    fn test_block_to_region_matches_two_step_conversion() {
        for &(x, y, z) in &[(0, 0, 0), (-1, -300, 4095), (1000, -1000, 77), (-257, 256, 255)] {
            assert_eq!(
                RegionCoord::from_block(x, y, z),
                ChunkCoord::from_block(x, y, z).region()
            );
        }
    }

    #[test]
    fn test_region_chunk_round_trip() {
        let region = RegionCoord::new(-2, 1, 3);
        let chunk = region.chunk(5, 15, 0).unwrap();
        assert_eq!(chunk.region(), region);
        assert_eq!(chunk.local(), (5, 15, 0));
        assert!(region.contains(chunk));
        assert!(region.chunk(16, 0, 0).is_none());
        assert!(region.chunk(0, -1, 0).is_none());
    }

    #[test]
    fn test_chunk_slot_range() {
        assert_eq!(chunk_slot(0, 0, 0), Some(0));
        assert_eq!(chunk_slot(15, 15, 15), Some(REGION_VOLUME - 1));
        assert_eq!(chunk_slot(16, 0, 0), None);
        assert_eq!(ChunkCoord::new(-1, -1, -1).region_slot(), REGION_VOLUME - 1);
    }
}
