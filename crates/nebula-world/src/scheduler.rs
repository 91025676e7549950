//! Staged tick protocol and the executors that drive it.
//!
//! Every region owns one [`TickExecutor`]: a dedicated OS thread that runs the
//! region's [`TickWorker`] callbacks one at a time, in the order the
//! [`TickScheduler`] dispatches them. For each global tick the scheduler
//! pulses every live executor through
//!
//! 1. `pre_snapshot_run`
//! 2. `start_tick_run(stage, delta)` for `stage` in `0..max_stages`
//! 3. `copy_snapshot_run`
//!
//! and joins all executors after each phase, so per-worker ordering is total
//! while different regions run concurrently within a phase. `halt_run` is
//! called exactly once, on the worker thread, when the executor is halted.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::error::TickError;
use crate::region_source::RegionSource;

/// Callbacks a region-like object implements to be driven by the scheduler.
pub trait TickWorker: Send + Sync + 'static {
    /// Called once on the worker thread before any other callback.
    fn on_start(&self) {}

    /// Observes the stable state of the previous tick and queues effects.
    fn pre_snapshot_run(&self) -> Result<(), TickError>;

    /// Runs one simulation stage. `stage` is in `0..self.stages()`.
    fn start_tick_run(&self, stage: u32, delta: Duration) -> Result<(), TickError>;

    /// Publishes this tick's live writes.
    fn copy_snapshot_run(&self) -> Result<(), TickError>;

    /// Final callback; nothing runs on this worker afterwards.
    fn halt_run(&self) -> Result<(), TickError>;

    /// Number of stages this worker accepts per tick.
    fn stages(&self) -> u32;
}

/// Lifecycle of a [`TickExecutor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutorState {
    /// Constructed, thread not spawned.
    Created = 0,
    /// Thread running and accepting commands.
    Started = 1,
    /// Halt requested; no new commands are accepted.
    Halting = 2,
    /// `halt_run` has been invoked or the executor was never started.
    Halted = 3,
}

impl ExecutorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Started,
            2 => Self::Halting,
            _ => Self::Halted,
        }
    }
}

/// One phase of a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickPhase {
    /// `pre_snapshot_run`.
    PreSnapshot,
    /// `start_tick_run(stage, delta)`.
    Stage {
        /// Stage index.
        stage: u32,
        /// Simulated time since the previous tick.
        delta: Duration,
    },
    /// `copy_snapshot_run`.
    CopySnapshot,
}

/// Completion report for one dispatched phase.
#[derive(Debug)]
pub struct PhaseResult {
    /// Executor name.
    pub worker: String,
    /// Phase that ran.
    pub phase: TickPhase,
    /// Callback outcome.
    pub result: Result<(), TickError>,
}

enum Command {
    Run(TickPhase, Sender<PhaseResult>),
    Halt,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// A dedicated worker thread driving one [`TickWorker`].
pub struct TickExecutor {
    name: String,
    state: Arc<AtomicU8>,
    commands: OnceLock<Sender<Command>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TickExecutor {
    /// Creates an executor in the [`ExecutorState::Created`] state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(AtomicU8::new(ExecutorState::Created as u8)),
            commands: OnceLock::new(),
            handle: Mutex::new(None),
        }
    }

    /// Executor (and thread) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ExecutorState {
        ExecutorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` while the executor accepts commands.
    pub fn is_started(&self) -> bool {
        self.state() == ExecutorState::Started
    }

    /// Spawns the worker thread.
    ///
    /// # Errors
    ///
    /// [`TickError::InvalidState`] if the executor was already started or
    /// halted, [`TickError::Spawn`] if the OS refused the thread. A failed
    /// spawn leaves the executor halted.
    pub fn start(&self, worker: Arc<dyn TickWorker>) -> Result<(), TickError> {
        if let Err(found) = self.state.compare_exchange(
            ExecutorState::Created as u8,
            ExecutorState::Started as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(TickError::InvalidState {
                expected: ExecutorState::Created,
                found: ExecutorState::from_u8(found),
            });
        }

        let (tx, rx) = unbounded();
        // Only reachable once because of the state CAS above.
        let _ = self.commands.set(tx);

        let state = Arc::clone(&self.state);
        let spawned = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run_worker(worker, rx, state));

        match spawned {
            Ok(handle) => {
                *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                tracing::trace!("Tick executor {} started", self.name);
                Ok(())
            }
            Err(source) => {
                self.state
                    .store(ExecutorState::Halted as u8, Ordering::Release);
                Err(TickError::Spawn {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Dispatches one phase. The result is sent to `done` when it finishes.
    ///
    /// Returns `false` without dispatching unless the executor is started.
    pub fn pulse(&self, phase: TickPhase, done: &Sender<PhaseResult>) -> bool {
        if !self.is_started() {
            return false;
        }
        match self.commands.get() {
            Some(tx) => tx.send(Command::Run(phase, done.clone())).is_ok(),
            None => false,
        }
    }

    /// Requests shutdown and waits for `halt_run` to complete.
    ///
    /// A phase already running finishes first; phases queued behind it are
    /// cancelled. Returns `true` only for the call that performed the halt.
    /// An executor that was never started moves straight to halted without
    /// calling `halt_run`.
    pub fn halt(&self) -> bool {
        match self.state.compare_exchange(
            ExecutorState::Started as u8,
            ExecutorState::Halting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(current) => {
                if current == ExecutorState::Created as u8 {
                    self.state
                        .store(ExecutorState::Halted as u8, Ordering::Release);
                }
                return false;
            }
        }

        if let Some(tx) = self.commands.get() {
            let _ = tx.send(Command::Halt);
        }

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                // Halted from inside a callback; the loop exits after it returns.
                return true;
            }
            if handle.join().is_err() {
                tracing::error!("Tick executor {} panicked", self.name);
            }
        }
        true
    }
}

impl std::fmt::Debug for TickExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickExecutor")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

fn run_worker(worker: Arc<dyn TickWorker>, commands: Receiver<Command>, state: Arc<AtomicU8>) {
    worker.on_start();

    for command in commands.iter() {
        match command {
            Command::Run(phase, done) => {
                let result = if state.load(Ordering::Acquire) == ExecutorState::Halting as u8 {
                    Err(TickError::Cancelled)
                } else {
                    run_phase(worker.as_ref(), phase)
                };
                let worker_name = std::thread::current()
                    .name()
                    .unwrap_or("tick-worker")
                    .to_string();
                if let Err(e) = &result
                    && !matches!(e, TickError::Cancelled)
                {
                    tracing::error!("{} failed in {:?}: {}", worker_name, phase, e);
                }
                let _ = done.send(PhaseResult {
                    worker: worker_name,
                    phase,
                    result,
                });
            }
            Command::Halt => break,
        }
    }

    if state
        .compare_exchange(
            ExecutorState::Halting as u8,
            ExecutorState::Halted as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_ok()
        && let Err(e) = worker.halt_run()
    {
        tracing::error!("halt_run failed: {}", e);
    }
}

fn run_phase(worker: &dyn TickWorker, phase: TickPhase) -> Result<(), TickError> {
    match phase {
        TickPhase::PreSnapshot => worker.pre_snapshot_run(),
        TickPhase::Stage { stage, delta } => {
            let stages = worker.stages();
            if stage >= stages {
                return Err(TickError::InvalidStage { stage, stages });
            }
            worker.start_tick_run(stage, delta)
        }
        TickPhase::CopySnapshot => worker.copy_snapshot_run(),
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Summary of one scheduler tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Regions dispatched in this tick.
    pub regions: usize,
    /// Stage count run in this tick.
    pub stages: u32,
    /// Callbacks that returned an error.
    pub failures: usize,
    /// Regions removed at the safe points of this tick.
    pub removed: usize,
    /// Wall-clock time spent in the tick.
    pub elapsed: Duration,
}

/// Drives every region of a [`RegionSource`] through the staged tick.
pub struct TickScheduler {
    source: Arc<RegionSource>,
    join_timeout: Duration,
    ticks: AtomicU64,
}

impl TickScheduler {
    /// Creates a scheduler. Phases that take longer than `join_timeout` are
    /// logged while the scheduler keeps waiting.
    pub fn new(source: Arc<RegionSource>, join_timeout: Duration) -> Self {
        Self {
            source,
            join_timeout,
            ticks: AtomicU64::new(0),
        }
    }

    /// The driven region source.
    pub fn source(&self) -> &Arc<RegionSource> {
        &self.source
    }

    /// Number of completed ticks.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Runs one full tick.
    ///
    /// Deferred region removals are applied before and after the staged
    /// phases, never while a phase is in flight.
    pub fn tick(&self, delta: Duration) -> TickReport {
        let start = Instant::now();
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let mut removed = self.source.drain_pending_removals();

        let regions = self.source.regions();
        let executors: Vec<_> = regions.iter().map(|r| (r.executor(), r.stages())).collect();
        let max_stages = executors.iter().map(|(_, s)| *s).max().unwrap_or(0);

        let mut failures = self.run_phase(
            executors.iter().map(|(e, _)| *e),
            TickPhase::PreSnapshot,
        );
        for stage in 0..max_stages {
            failures += self.run_phase(
                executors
                    .iter()
                    .filter(|(_, stages)| stage < *stages)
                    .map(|(e, _)| *e),
                TickPhase::Stage { stage, delta },
            );
        }
        failures += self.run_phase(
            executors.iter().map(|(e, _)| *e),
            TickPhase::CopySnapshot,
        );

        removed += self.source.drain_pending_removals();

        let report = TickReport {
            tick,
            regions: regions.len(),
            stages: max_stages,
            failures,
            removed,
            elapsed: start.elapsed(),
        };
        tracing::trace!(
            tick,
            regions = report.regions,
            failures,
            removed,
            "Tick complete"
        );
        report
    }

    /// Pulses every executor with `phase` and waits for all of them.
    /// Returns the number of failed callbacks.
    fn run_phase<'a>(
        &self,
        executors: impl Iterator<Item = &'a TickExecutor>,
        phase: TickPhase,
    ) -> usize {
        let (done_tx, done_rx) = unbounded();
        let dispatched = executors.filter(|e| e.pulse(phase, &done_tx)).count();
        drop(done_tx);

        let mut received = 0;
        let mut failures = 0;
        let phase_start = Instant::now();
        while received < dispatched {
            match done_rx.recv_timeout(self.join_timeout) {
                Ok(result) => {
                    received += 1;
                    if result.result.is_err() {
                        failures += 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        "Tick phase {:?} exceeded {:?}: {}/{} workers still running after {:?}",
                        phase,
                        self.join_timeout,
                        dispatched - received,
                        dispatched,
                        phase_start.elapsed()
                    );
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let lost = dispatched - received;
                    tracing::error!(
                        "Tick phase {:?} lost {} workers without a result",
                        phase,
                        lost
                    );
                    failures += lost;
                    break;
                }
            }
        }
        failures
    }

    /// Applies pending removals and halts every remaining region.
    pub fn shutdown(&self) {
        self.source.drain_pending_removals();
        let halted = self.source.halt_all();
        tracing::info!("Scheduler shut down after {} ticks, halted {} regions", self.tick_count(), halted);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
