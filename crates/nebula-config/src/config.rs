//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the persisted configuration.
pub const CONFIG_FILE: &str = "config.ron";

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// World settings.
    pub world: WorldConfig,
    /// Tick scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Id map settings.
    pub intern: InternConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// World configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    /// World name, also the save directory name.
    pub name: String,
    /// Generation seed.
    pub seed: u64,
    /// Root directory for world saves. Relative paths are resolved against
    /// the config directory.
    pub save_dir: PathBuf,
    /// Loaded-region count above which a warning is logged.
    pub region_warn_threshold: usize,
    /// World Y of the first air block of the flat generator.
    pub surface_height: i32,
}

/// Tick scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Target ticks per second.
    pub tick_rate_hz: u32,
    /// Time a tick phase may take before it is logged as slow.
    pub join_timeout_ms: u64,
    /// Ticks run back-to-back to catch up after a stall before the backlog
    /// is dropped.
    pub max_catch_up_ticks: u32,
}

/// Id map configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InternConfig {
    /// First dynamically assigned id; ids below are reserved.
    pub min_id: u32,
    /// One past the last dynamically assigned id.
    pub max_id: u32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Log a summary line every this many ticks (0 = never).
    pub tick_report_interval: u64,
}

// --- Default implementations ---

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: "world".to_string(),
            seed: 0,
            save_dir: PathBuf::from("saves"),
            region_warn_threshold: 64,
            surface_height: 64,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 20,
            join_timeout_ms: 5000,
            max_catch_up_ticks: 5,
        }
    }
}

impl Default for InternConfig {
    fn default() -> Self {
        Self {
            min_id: 1,
            max_id: 1 << 16,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            tick_report_interval: 200,
        }
    }
}

impl SchedulerConfig {
    /// Duration of one tick at the configured rate.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz.max(1)
    }

    /// Phase join timeout.
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Default config directory for the server (`<os config dir>/nebula-server`).
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nebula-server")
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.tick_rate_hz == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.tick_rate_hz must be positive".to_string(),
            ));
        }
        if self.intern.min_id > self.intern.max_id || self.intern.max_id == u32::MAX {
            return Err(ConfigError::Invalid(format!(
                "intern id range [{}, {}) is invalid",
                self.intern.min_id, self.intern.max_id
            )));
        }
        if self.world.name.is_empty() {
            return Err(ConfigError::Invalid("world.name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Save directory of the configured world, resolved against `config_dir`.
    pub fn world_dir(&self, config_dir: &Path) -> PathBuf {
        config_dir.join(&self.world.save_dir).join(&self.world.name)
    }
}
