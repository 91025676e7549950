//! Command-line argument parsing for the Nebula server.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Nebula server command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "nebula-server", about = "Headless Nebula world server")]
pub struct CliArgs {
    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Stop after this many ticks (runs until interrupted otherwise).
    #[arg(long)]
    pub ticks: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// World name.
    #[arg(long)]
    pub world: Option<String>,

    /// World seed.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Target ticks per second.
    #[arg(long)]
    pub tick_rate: Option<u32>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if let Some(ref name) = args.world {
            self.world.name = name.clone();
        }
        if let Some(seed) = args.seed {
            self.world.seed = seed;
        }
        if let Some(rate) = args.tick_rate {
            self.scheduler.tick_rate_hz = rate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            seed: Some(1234),
            log_level: Some("debug".to_string()),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.world.seed, 1234);
        assert_eq!(config.debug.log_level, "debug");
        // Non-overridden fields retain defaults
        assert_eq!(config.world.name, "world");
        assert_eq!(config.scheduler.tick_rate_hz, 20);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from([
            "nebula-server",
            "--ticks",
            "100",
            "--tick-rate",
            "40",
            "--config",
            "/tmp/nebula",
        ]);
        assert_eq!(args.ticks, Some(100));
        assert_eq!(args.tick_rate, Some(40));
        assert_eq!(args.config, Some(PathBuf::from("/tmp/nebula")));
        assert!(args.world.is_none());
    }
}
