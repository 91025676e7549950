//! Concurrent map from region coordinates to live regions.
//!
//! Lookups are lock-free on the fast path. Creation races are resolved by
//! insert-if-absent: every caller that asks for the same coordinate gets the
//! same region, and only the winning candidate ever starts a worker. Empty
//! regions are dropped from the map only at scheduler safe points, through
//! [`RegionSource::drain_pending_removals`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, unbounded};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::context::WorldContext;
use crate::coords::{ChunkCoord, RegionCoord};
use crate::error::{TickError, WorldError};
use crate::events::{EventBus, RegionEvent};
use crate::region::{LoadOption, Region, RegionId, RemovalRequest};

/// Default region count above which a warning is logged.
pub const DEFAULT_WARN_THRESHOLD: usize = 64;

/// How much the warning threshold grows each time it is crossed.
const WARN_THRESHOLD_STEP: usize = 10;

/// Starts a freshly created region's worker.
type StartWorker = fn(&Arc<Region>) -> Result<(), TickError>;

/// Owns every loaded region of one world.
pub struct RegionSource {
    context: Arc<WorldContext>,
    loaded: DashMap<RegionCoord, Arc<Region>>,
    next_id: AtomicU64,
    removal_tx: Sender<RemovalRequest>,
    removal_rx: Receiver<RemovalRequest>,
    region_count: AtomicUsize,
    warn_threshold: AtomicUsize,
    events: EventBus<RegionEvent>,
    start_worker: StartWorker,
}

impl RegionSource {
    /// Creates an empty source.
    pub fn new(context: Arc<WorldContext>, warn_threshold: usize) -> Self {
        let (removal_tx, removal_rx) = unbounded();
        Self {
            context,
            loaded: DashMap::new(),
            next_id: AtomicU64::new(1),
            removal_tx,
            removal_rx,
            region_count: AtomicUsize::new(0),
            warn_threshold: AtomicUsize::new(warn_threshold),
            events: EventBus::new(),
            start_worker: Region::start,
        }
    }

    #[cfg(test)]
    fn with_start_worker(mut self, start_worker: StartWorker) -> Self {
        self.start_worker = start_worker;
        self
    }

    /// Shared world collaborators.
    pub fn context(&self) -> &Arc<WorldContext> {
        &self.context
    }

    /// Returns the region at `coord`, creating it if `option` allows.
    ///
    /// With [`LoadOption::LoadOnly`] a region is only created when storage
    /// already holds data for it. A newly created region has its worker
    /// started before it becomes visible to other callers; if the start
    /// fails the region is discarded and [`WorldError::WorkerStart`] returned.
    ///
    /// The worker thread is spawned while the map shard for `coord` is
    /// write-locked, so lookups of other coordinates in that shard wait for
    /// the spawn.
    pub fn get_region(
        &self,
        coord: RegionCoord,
        option: LoadOption,
    ) -> Result<Option<Arc<Region>>, WorldError> {
        if let Some(region) = self.loaded.get(&coord) {
            return Ok(Some(Arc::clone(region.value())));
        }
        if !option.load_if_needed() {
            return Ok(None);
        }
        if !option.generate_if_needed() && !self.context.store.region_exists(coord) {
            return Ok(None);
        }

        let id = RegionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let region = match self.loaded.entry(coord) {
            Entry::Occupied(existing) => return Ok(Some(Arc::clone(existing.get()))),
            Entry::Vacant(vacant) => {
                let candidate = Arc::new(Region::new(
                    id,
                    coord,
                    Arc::clone(&self.context),
                    self.removal_tx.clone(),
                ));
                (self.start_worker)(&candidate)
                    .map_err(|source| WorldError::WorkerStart { coord, source })?;
                vacant.insert(Arc::clone(&candidate));
                candidate
            }
        };

        let count = self.region_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.check_threshold(count);
        self.events.publish(RegionEvent::Loaded { coord, id });
        tracing::debug!("Loaded {} {} ({} regions)", coord, id, count);
        Ok(Some(region))
    }

    /// Returns the region containing world block `(x, y, z)`.
    pub fn get_region_from_block(
        &self,
        x: i32,
        y: i32,
        z: i32,
        option: LoadOption,
    ) -> Result<Option<Arc<Region>>, WorldError> {
        self.get_region(RegionCoord::from_block(x, y, z), option)
    }

    /// Returns the region containing `chunk`.
    pub fn get_region_from_chunk(
        &self,
        chunk: ChunkCoord,
        option: LoadOption,
    ) -> Result<Option<Arc<Region>>, WorldError> {
        self.get_region(chunk.region(), option)
    }

    /// Returns `true` if a region is loaded at `coord`.
    pub fn has_region(&self, coord: RegionCoord) -> bool {
        self.loaded.contains_key(&coord)
    }

    /// Snapshot of all loaded regions.
    pub fn regions(&self) -> Vec<Arc<Region>> {
        self.loaded
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of loaded regions.
    pub fn len(&self) -> usize {
        self.region_count.load(Ordering::Acquire)
    }

    /// Returns `true` if no regions are loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current warning threshold.
    pub fn warn_threshold(&self) -> usize {
        self.warn_threshold.load(Ordering::Acquire)
    }

    /// Subscribes to region lifecycle events.
    pub fn subscribe(&self) -> Receiver<RegionEvent> {
        self.events.subscribe()
    }

    fn check_threshold(&self, count: usize) {
        let threshold = self.warn_threshold.load(Ordering::Acquire);
        if count <= threshold {
            return;
        }
        // Only the caller that moves the threshold logs.
        if self
            .warn_threshold
            .compare_exchange(
                threshold,
                threshold + WARN_THRESHOLD_STEP,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            tracing::warn!(
                "{} regions loaded in world '{}', above the warning threshold of {}",
                count,
                self.context.name,
                threshold
            );
        }
    }

    /// Applies queued removal requests.
    ///
    /// A region is removed only if it is still the instance mapped at its
    /// coordinate and can be closed while still empty; its worker is then
    /// halted. Requests that
    /// no longer apply re-arm the region so a later emptiness is reported
    /// again. Must only be called between ticks.
    pub fn drain_pending_removals(&self) -> usize {
        let mut removed = 0;
        for request in self.removal_rx.try_iter() {
            let taken = self.loaded.remove_if(&request.coord, |_, region| {
                region.id() == request.id && region.try_close()
            });
            match taken {
                Some((coord, region)) => {
                    region.executor().halt();
                    self.region_count.fetch_sub(1, Ordering::AcqRel);
                    self.events.publish(RegionEvent::Unloaded {
                        coord,
                        id: region.id(),
                    });
                    tracing::debug!("Removed {} {}", coord, region.id());
                    removed += 1;
                }
                None => {
                    if let Some(region) = self.loaded.get(&request.coord)
                        && region.id() == request.id
                    {
                        region.clear_removal_request();
                    }
                }
            }
        }
        removed
    }

    /// Halts every region's worker. Returns the number halted.
    ///
    /// Regions stay mapped; halting flushes their pending saves.
    pub fn halt_all(&self) -> usize {
        self.regions()
            .iter()
            .filter(|region| region.executor().halt())
            .count()
    }
}

impl std::fmt::Debug for RegionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionSource")
            .field("world", &self.context.name)
            .field("regions", &self.len())
            .field("warn_threshold", &self.warn_threshold())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
