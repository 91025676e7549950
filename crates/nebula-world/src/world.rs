//! World-level façade over a [`RegionSource`] and its [`TickScheduler`].
//!
//! This is the surface used by load/save orchestration and gameplay code. It
//! only forwards to the region that owns a coordinate; all concurrency rules
//! are those of [`Region`] and [`RegionSource`].

use std::sync::Arc;
use std::time::Duration;

use crate::chunk::Chunk;
use crate::context::WorldContext;
use crate::coords::{ChunkCoord, RegionCoord};
use crate::error::WorldError;
use crate::material::BlockMaterial;
use crate::region::{BlockChange, LoadOption, Region};
use crate::region_source::{DEFAULT_WARN_THRESHOLD, RegionSource};
use crate::scheduler::{TickReport, TickScheduler};

/// Tunables for a [`World`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldSettings {
    /// Region count above which a warning is logged.
    pub region_warn_threshold: usize,
    /// How long the scheduler waits on a phase before logging.
    pub join_timeout: Duration,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            region_warn_threshold: DEFAULT_WARN_THRESHOLD,
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// One simulated world.
pub struct World {
    context: Arc<WorldContext>,
    source: Arc<RegionSource>,
    scheduler: TickScheduler,
}

impl World {
    /// Creates an empty world. No regions are loaded until first access.
    pub fn new(context: WorldContext, settings: WorldSettings) -> Self {
        let context = Arc::new(context);
        let source = Arc::new(RegionSource::new(
            Arc::clone(&context),
            settings.region_warn_threshold,
        ));
        let scheduler = TickScheduler::new(Arc::clone(&source), settings.join_timeout);
        tracing::info!(
            "World '{}' created (seed {}, generator {})",
            context.name,
            context.seed,
            context.generator.name()
        );
        Self {
            context,
            source,
            scheduler,
        }
    }

    /// World name.
    pub fn name(&self) -> &str {
        &self.context.name
    }

    /// Shared world collaborators.
    pub fn context(&self) -> &Arc<WorldContext> {
        &self.context
    }

    /// The region source backing this world.
    pub fn regions(&self) -> &Arc<RegionSource> {
        &self.source
    }

    /// The scheduler driving this world.
    pub fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    /// Returns the region at `coord`, creating it if `option` allows.
    pub fn get_region(
        &self,
        coord: RegionCoord,
        option: LoadOption,
    ) -> Result<Option<Arc<Region>>, WorldError> {
        self.source.get_region(coord, option)
    }

    /// Returns the chunk at `coord`, creating its region and loading or
    /// generating the chunk if `option` allows.
    ///
    /// Only [`LoadOption::NoLoad`] is guaranteed not to block on storage. A
    /// region removed between lookup and load is looked up again.
    pub fn get_chunk(
        &self,
        coord: ChunkCoord,
        option: LoadOption,
    ) -> Result<Option<Arc<Chunk>>, WorldError> {
        loop {
            let Some(region) = self.source.get_region_from_chunk(coord, option)? else {
                return Ok(None);
            };
            match region.get_chunk(coord, option) {
                None if region.is_closed() => continue,
                chunk => return Ok(chunk),
            }
        }
    }

    /// Returns the chunk containing world block `(x, y, z)`.
    pub fn get_chunk_from_block(
        &self,
        x: i32,
        y: i32,
        z: i32,
        option: LoadOption,
    ) -> Result<Option<Arc<Chunk>>, WorldError> {
        self.get_chunk(ChunkCoord::from_block(x, y, z), option)
    }

    /// Ensures the chunk at `coord` is loaded. Returns `false` if it is not
    /// in storage and `generate` is off.
    pub fn load_chunk(&self, coord: ChunkCoord, generate: bool) -> Result<bool, WorldError> {
        let option = if generate {
            LoadOption::LoadOrGenerate
        } else {
            LoadOption::LoadOnly
        };
        Ok(self.get_chunk(coord, option)?.is_some())
    }

    /// Queues the chunk at `coord` for unloading. Returns `false` if it is not
    /// loaded.
    pub fn unload_chunk(&self, coord: ChunkCoord, save: bool) -> bool {
        self.loaded_region(coord)
            .is_some_and(|region| region.unload_chunk(coord, save))
    }

    /// Returns `true` if the chunk at `coord` is loaded.
    pub fn is_loaded(&self, coord: ChunkCoord) -> bool {
        self.loaded_region(coord)
            .is_some_and(|region| region.has_chunk(coord))
    }

    /// Queues the chunk at `coord` for saving after the next tick. Returns
    /// `false` if it is not loaded.
    pub fn force_save(&self, coord: ChunkCoord) -> bool {
        self.loaded_region(coord)
            .is_some_and(|region| region.save_chunk(coord))
    }

    /// Queues every loaded chunk for saving. Returns the number of regions.
    pub fn save_all(&self) -> usize {
        let regions = self.source.regions();
        for region in &regions {
            region.save();
        }
        tracing::info!("Queued save of {} regions in '{}'", regions.len(), self.name());
        regions.len()
    }

    /// Queues regeneration of a loaded chunk. Returns `false` if it is not
    /// loaded.
    pub fn force_regeneration(&self, coord: ChunkCoord) -> bool {
        self.loaded_region(coord)
            .is_some_and(|region| region.has_chunk(coord) && region.queue_regeneration(coord))
    }

    /// Stable material at world block `(x, y, z)`, or `None` if not loaded.
    pub fn get_block_material(&self, x: i32, y: i32, z: i32) -> Option<&BlockMaterial> {
        let region = self.loaded_region(ChunkCoord::from_block(x, y, z))?;
        let chunk = region.get_chunk_from_block(x, y, z, LoadOption::NoLoad)?;
        Some(chunk.get_block_material(&self.context.materials, x, y, z))
    }

    /// Queues a block write applied by the owning region in the next tick.
    ///
    /// Creates the region if needed; the chunk is loaded or generated on the
    /// region worker.
    pub fn set_block(&self, change: BlockChange) -> Result<bool, WorldError> {
        loop {
            let Some(region) = self.source.get_region_from_block(
                change.x,
                change.y,
                change.z,
                LoadOption::LoadOrGenerate,
            )?
            else {
                return Ok(false);
            };
            if region.queue_block_change(change) {
                return Ok(true);
            }
            if !region.is_closed() {
                return Ok(false);
            }
        }
    }

    /// Queues a physics update for a loaded block.
    pub fn queue_block_update(&self, x: i32, y: i32, z: i32) -> bool {
        self.loaded_region(ChunkCoord::from_block(x, y, z))
            .is_some_and(|region| region.queue_block_update(x, y, z))
    }

    /// Runs one tick.
    pub fn tick(&self, delta: Duration) -> TickReport {
        self.scheduler.tick(delta)
    }

    /// Halts every region worker, flushing pending saves.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    fn loaded_region(&self, coord: ChunkCoord) -> Option<Arc<Region>> {
        // NoLoad never creates a region, so this cannot fail.
        self.source
            .get_region_from_chunk(coord, LoadOption::NoLoad)
            .ok()
            .flatten()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("context", &self.context)
            .field("regions", &self.source.len())
            .field("ticks", &self.scheduler.tick_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::FlatGenerator;
    use crate::material::{GRASS, STONE};
    use crate::store::{ChunkStore, MemoryChunkStore};

    fn make_world(store: Arc<MemoryChunkStore>) -> World {
        let context = WorldContext::new("overworld", 11, store, Arc::new(FlatGenerator::new(8)));
        World::new(context, WorldSettings::default())
    }

    const DELTA: Duration = Duration::from_millis(50);

    #[test]
    fn test_load_and_query() {
        let world = make_world(Arc::new(MemoryChunkStore::new()));
        let coord = ChunkCoord::new(0, 0, 0);

        assert!(!world.load_chunk(coord, false).unwrap());
        assert!(!world.is_loaded(coord));
        assert!(world.load_chunk(coord, true).unwrap());
        assert!(world.is_loaded(coord));
        assert_eq!(world.get_block_material(1, 7, 1).unwrap().name, "grass");
        assert!(world.get_block_material(1, 7, 100).is_none());
        world.shutdown();
    }

    #[test]
    fn test_set_block_visible_after_tick() {
        let world = make_world(Arc::new(MemoryChunkStore::new()));
        let change = BlockChange {
            x: -3,
            y: 7,
            z: 40,
            id: STONE,
            data: 0,
        };
        assert!(world.set_block(change).unwrap());
        world.tick(DELTA);

        let chunk = world
            .get_chunk_from_block(-3, 7, 40, LoadOption::NoLoad)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.get_block_id(-3, 7, 40), STONE);
        assert_eq!(chunk.get_block_id(-2, 7, 40), GRASS);
        world.shutdown();
    }

    #[test]
    fn test_force_save_and_unload() {
        let store = Arc::new(MemoryChunkStore::new());
        let world = make_world(store.clone());
        let coord = ChunkCoord::new(2, 0, 2);
        world.load_chunk(coord, true).unwrap();

        assert!(world.force_save(coord));
        world.tick(DELTA);
        assert!(store.read(coord).unwrap().is_some());

        assert!(world.unload_chunk(coord, false));
        let report = world.tick(DELTA);
        assert!(!world.is_loaded(coord));
        assert_eq!(report.removed, 1);
        assert!(world.regions().is_empty());
        assert!(!world.force_save(coord));
        assert!(!world.unload_chunk(coord, true));
    }

    #[test]
    fn test_force_regeneration() {
        let world = make_world(Arc::new(MemoryChunkStore::new()));
        let coord = ChunkCoord::new(0, 0, 0);
        assert!(!world.force_regeneration(coord));

        world.load_chunk(coord, true).unwrap();
        world
            .set_block(BlockChange {
                x: 0,
                y: 7,
                z: 0,
                id: STONE,
                data: 0,
            })
            .unwrap();
        world.tick(DELTA);
        assert_eq!(world.get_block_material(0, 7, 0).unwrap().name, "stone");

        assert!(world.force_regeneration(coord));
        world.tick(DELTA);
        assert_eq!(world.get_block_material(0, 7, 0).unwrap().name, "grass");
        world.shutdown();
    }

    #[test]
    fn test_save_all_flushes_every_region() {
        let store = Arc::new(MemoryChunkStore::new());
        let world = make_world(store.clone());
        world.load_chunk(ChunkCoord::new(0, 0, 0), true).unwrap();
        world.load_chunk(ChunkCoord::new(40, 0, 0), true).unwrap();
        assert_eq!(world.save_all(), 2);
        world.tick(DELTA);
        assert_eq!(store.len(), 2);
        world.shutdown();
    }

    #[test]
    fn test_loads_after_region_removal_reach_a_live_region() {
        let store = Arc::new(MemoryChunkStore::new());
        let world = make_world(store.clone());
        let coord = ChunkCoord::new(1, 1, 1);
        world.load_chunk(coord, true).unwrap();
        let stale = world
            .get_region(coord.region(), LoadOption::NoLoad)
            .unwrap()
            .unwrap();

        assert!(world.unload_chunk(coord, false));
        assert_eq!(world.tick(DELTA).removed, 1);
        assert!(stale.is_closed());

        let chunk = world
            .get_chunk(coord, LoadOption::LoadOrGenerate)
            .unwrap()
            .unwrap();
        let live = world
            .get_region(coord.region(), LoadOption::NoLoad)
            .unwrap()
            .unwrap();
        assert!(!live.is_closed());
        assert!(live.has_chunk(coord));
        assert!(!stale.has_chunk(coord));

        assert!(world.set_block(BlockChange {
            x: 16,
            y: 16,
            z: 16,
            id: STONE,
            data: 0,
        })
        .unwrap());
        world.tick(DELTA);
        assert_eq!(chunk.get_block_id(16, 16, 16), STONE);
        world.shutdown();
    }
}
