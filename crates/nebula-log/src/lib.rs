//! Structured logging for the Nebula server.
//!
//! Provides filterable logging via the `tracing` ecosystem: console output
//! with uptime timestamps and thread names (every region worker is a named
//! thread), plus JSON file logging in debug builds for post-mortem analysis.
//! Integrates with the configuration system to allow runtime log level
//! control.

use nebula_config::Config;
use std::path::Path;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config sets a level.
///
/// Snapshot publication logs every tick at `trace`; keep it quiet by default.
pub const DEFAULT_FILTER: &str = "info,nebula_snapshot=warn";

/// Builds the filter string for a configured level.
///
/// An empty level falls back to [`DEFAULT_FILTER`]. A bare level keeps the
/// snapshot crate at `warn` unless the level asks for `trace`.
pub fn filter_for_level(level: &str) -> String {
    match level.trim() {
        "" => DEFAULT_FILTER.to_string(),
        "trace" => "trace".to_string(),
        level if level.contains('=') || level.contains(',') => level.to_string(),
        level => format!("{level},nebula_snapshot=warn"),
    }
}

/// Initialize the tracing subscriber for the server.
///
/// Sets up structured logging with:
/// - Console output with uptime, module paths, thread names and levels
/// - JSON file logging in debug builds (optional)
/// - Environment-based filtering (respects RUST_LOG)
/// - Integration with config system log_level setting
///
/// # Examples
///
/// ```no_run
/// use nebula_log::init_logging;
/// use nebula_config::Config;
///
/// let config = Config::default();
/// init_logging(Some(std::path::Path::new("./logs")), true, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let filter_str = config
        .map(|config| filter_for_level(&config.debug.log_level))
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());

    // RUST_LOG wins over the config.
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join("nebula-server.log"))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

/// Create an `EnvFilter` with [`DEFAULT_FILTER`].
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}
