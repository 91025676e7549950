//! Chunk persistence collaborators.
//!
//! A [`ChunkStore`] reads and writes [`ChunkPayload`]s by chunk coordinate.
//! The world never lets a store failure escape into the tick loop: errors are
//! logged by the caller and the chunk is treated as absent.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::coords::{CHUNK_VOLUME, ChunkCoord, RegionCoord};
use crate::error::StoreError;
use crate::material::AIR;

/// The persisted contents of one chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Material ids in [`block_index`](crate::block_index) order.
    pub block_ids: Vec<u16>,
    /// Material data values in the same order.
    pub block_data: Vec<u8>,
    /// Whether decoration has already run for this chunk.
    pub populated: bool,
}

impl ChunkPayload {
    /// A chunk filled with air.
    pub fn empty() -> Self {
        Self::filled(AIR, 0)
    }

    /// A chunk filled with a single material.
    pub fn filled(id: u16, data: u8) -> Self {
        Self {
            block_ids: vec![id; CHUNK_VOLUME],
            block_data: vec![data; CHUNK_VOLUME],
            populated: false,
        }
    }

    /// Returns `true` if both arrays hold exactly one chunk of blocks.
    pub fn is_valid(&self) -> bool {
        self.block_ids.len() == CHUNK_VOLUME && self.block_data.len() == CHUNK_VOLUME
    }
}

/// Backing storage for chunk payloads.
pub trait ChunkStore: Send + Sync {
    /// Reads a chunk. `Ok(None)` means the chunk has never been written.
    fn read(&self, coord: ChunkCoord) -> Result<Option<ChunkPayload>, StoreError>;

    /// Writes a chunk, replacing any previous contents.
    fn write(&self, coord: ChunkCoord, payload: &ChunkPayload) -> Result<(), StoreError>;

    /// Returns `true` if any chunk of the region has been written.
    fn region_exists(&self, region: RegionCoord) -> bool;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// A [`ChunkStore`] held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    chunks: DashMap<ChunkCoord, ChunkPayload>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryChunkStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of `read` calls served.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of `write` calls served.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl ChunkStore for MemoryChunkStore {
    fn read(&self, coord: ChunkCoord) -> Result<Option<ChunkPayload>, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.chunks.get(&coord).map(|entry| entry.value().clone()))
    }

    fn write(&self, coord: ChunkCoord, payload: &ChunkPayload) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.chunks.insert(coord, payload.clone());
        Ok(())
    }

    fn region_exists(&self, region: RegionCoord) -> bool {
        self.chunks.iter().any(|entry| entry.key().region() == region)
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// A [`ChunkStore`] writing one postcard file per chunk, grouped into one
/// directory per region.
#[derive(Clone, Debug)]
pub struct FileChunkStore {
    root: PathBuf,
}

impl FileChunkStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn region_dir(&self, region: RegionCoord) -> PathBuf {
        self.root
            .join(format!("r.{}.{}.{}", region.x, region.y, region.z))
    }

    fn chunk_path(&self, coord: ChunkCoord) -> PathBuf {
        let (x, y, z) = coord.local();
        self.region_dir(coord.region())
            .join(format!("c.{x}.{y}.{z}.chunk"))
    }
}

impl ChunkStore for FileChunkStore {
    fn read(&self, coord: ChunkCoord) -> Result<Option<ChunkPayload>, StoreError> {
        let path = self.chunk_path(coord);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let payload: ChunkPayload =
            postcard::from_bytes(&bytes).map_err(|e| StoreError::Corrupt {
                coord,
                reason: e.to_string(),
            })?;
        if !payload.is_valid() {
            return Err(StoreError::Corrupt {
                coord,
                reason: format!(
                    "expected {CHUNK_VOLUME} blocks, found {} ids and {} data",
                    payload.block_ids.len(),
                    payload.block_data.len()
                ),
            });
        }
        Ok(Some(payload))
    }

    fn write(&self, coord: ChunkCoord, payload: &ChunkPayload) -> Result<(), StoreError> {
        let dir = self.region_dir(coord.region());
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let bytes = postcard::to_allocvec(payload).map_err(|e| StoreError::Encode {
            coord,
            reason: e.to_string(),
        })?;

        // Readers only ever see a complete file: write a sibling, then rename.
        let path = self.chunk_path(coord);
        let tmp = path.with_extension("chunk.tmp");
        fs::write(&tmp, &bytes).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io { path, source })?;
        Ok(())
    }

    fn region_exists(&self, region: RegionCoord) -> bool {
        self.region_dir(region).is_dir()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::block_index;
    use crate::material::STONE;

    fn sample_payload() -> ChunkPayload {
        let mut payload = ChunkPayload::empty();
        payload.block_ids[block_index(1, 2, 3)] = STONE;
        payload.block_data[block_index(1, 2, 3)] = 4;
        payload.populated = true;
        payload
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryChunkStore::new();
        let coord = ChunkCoord::new(3, -1, 7);
        assert!(store.read(coord).unwrap().is_none());
        assert!(!store.region_exists(coord.region()));

        store.write(coord, &sample_payload()).unwrap();
        assert_eq!(store.read(coord).unwrap(), Some(sample_payload()));
        assert!(store.region_exists(coord.region()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.read_count(), 2);
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileChunkStore::new(dir.path());
        let coord = ChunkCoord::new(-17, 0, 40);

        assert!(store.read(coord).unwrap().is_none());
        assert!(!store.region_exists(coord.region()));

        store.write(coord, &sample_payload()).unwrap();
        assert!(store.region_exists(coord.region()));
        assert_eq!(store.read(coord).unwrap(), Some(sample_payload()));

        let mut updated = sample_payload();
        updated.populated = false;
        store.write(coord, &updated).unwrap();
        assert_eq!(store.read(coord).unwrap(), Some(updated));
    }

    #[test]
    fn test_file_store_reports_corrupt_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileChunkStore::new(dir.path());
        let coord = ChunkCoord::new(0, 0, 0);
        store.write(coord, &sample_payload()).unwrap();

        fs::write(store.chunk_path(coord), b"\xff\xff\xff").unwrap();
        assert!(matches!(
            store.read(coord),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_file_store_rejects_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileChunkStore::new(dir.path());
        let coord = ChunkCoord::new(1, 1, 1);
        let short = ChunkPayload {
            block_ids: vec![0; 10],
            block_data: vec![0; 10],
            populated: false,
        };
        store.write(coord, &short).unwrap();
        assert!(matches!(
            store.read(coord),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
