//! Headless Nebula world server.
//!
//! Loads `config.ron` (overridable via CLI flags), initialises logging, builds
//! a world backed by on-disk chunk storage and runs the fixed-rate tick loop.
//! Run with `cargo run -p nebula-server -- --ticks 200` for a bounded run.

mod tick_loop;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use nebula_config::{CliArgs, Config};
use nebula_intern::{InternError, SyncedIdInterner, SyncedMapRegistry};
use nebula_world::{
    ChunkCoord, FileChunkStore, FlatGenerator, MaterialRegistry, World, WorldContext,
    WorldSettings,
};
use tracing::{error, info};

use crate::tick_loop::TickLoop;

/// Material id map file inside the world directory.
const MATERIAL_IDS_FILE: &str = "material-ids.ron";

fn main() {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(Config::default_dir);

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    nebula_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(2);
    }

    if let Err(e) = run(&config, &config_dir, args.ticks) {
        error!("Server stopped: {}", e);
        std::process::exit(1);
    }
}

fn run(
    config: &Config,
    config_dir: &Path,
    tick_limit: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let world_dir = config.world_dir(config_dir);
    info!("World '{}' stored at {}", config.world.name, world_dir.display());

    let context = WorldContext::new(
        config.world.name.clone(),
        config.world.seed,
        Arc::new(FileChunkStore::new(world_dir.clone())),
        Arc::new(FlatGenerator::new(config.world.surface_height)),
    );

    // Material names are published through the synced registry so peers can
    // translate block ids.
    let registry = SyncedMapRegistry::new(config.intern.min_id, config.intern.max_id)?;
    let materials = registry.create("materials")?;
    let restored = sync_material_ids(
        &materials,
        &context.materials,
        &world_dir.join(MATERIAL_IDS_FILE),
    )?;
    info!(
        "Registered {} materials in id map #{} ({} restored)",
        materials.interner().len(),
        materials.map_id(),
        restored
    );

    let world = World::new(
        context,
        WorldSettings {
            region_warn_threshold: config.world.region_warn_threshold,
            join_timeout: config.scheduler.join_timeout(),
        },
    );

    let spawn = ChunkCoord::from_block(0, config.world.surface_height - 1, 0);
    if world.load_chunk(spawn, true)? {
        info!("Spawn {} loaded in {}", spawn, spawn.region());
    }

    let mut tick_loop = TickLoop::new(
        config.scheduler.tick_interval(),
        config.scheduler.max_catch_up_ticks,
        Instant::now(),
    );
    let report_interval = config.debug.tick_report_interval;
    let mut completed: u64 = 0;

    info!(
        "Ticking at {} Hz{}",
        config.scheduler.tick_rate_hz,
        tick_limit
            .map(|limit| format!(" for {limit} ticks"))
            .unwrap_or_default()
    );

    'outer: while tick_limit != Some(0) {
        let due = tick_loop.due_ticks(Instant::now());
        for _ in 0..due {
            let report = world.tick(tick_loop.interval());
            completed += 1;
            if report.failures > 0 {
                error!("Tick {} had {} failed callbacks", report.tick, report.failures);
            }
            if report_interval > 0 && completed % report_interval == 0 {
                info!(
                    "Tick {}: {} regions, {} removed, {:?}",
                    report.tick, report.regions, report.removed, report.elapsed
                );
            }
            if tick_limit.is_some_and(|limit| completed >= limit) {
                break 'outer;
            }
        }
        std::thread::sleep(tick_loop.time_until_next(Instant::now()));
    }

    world.save_all();
    world.tick(tick_loop.interval());
    world.shutdown();
    materials
        .interner()
        .save_to(&world_dir.join(MATERIAL_IDS_FILE))?;
    info!(
        "Stopped after {} ticks ({} dropped while behind)",
        completed,
        tick_loop.skipped()
    );
    Ok(())
}

/// Restores saved material ids, registers every material name and saves the
/// map back. Returns the number of restored ids.
fn sync_material_ids(
    materials: &SyncedIdInterner,
    registry: &MaterialRegistry,
    path: &Path,
) -> Result<usize, InternError> {
    let restored = materials.load_from(path)?;
    for material in registry.materials() {
        materials.register(&material.name)?;
    }
    materials.interner().save_to(path)?;
    Ok(restored)
}
