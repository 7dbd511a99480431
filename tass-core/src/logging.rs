//! Structured logging setup using the `tracing` ecosystem.
//!
//! Provides daily file rotation, configurable log levels, and both
//! human-readable and JSON output formats.

use std::path::Path;

use tracing::Subscriber;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{TassError, TassResult};

/// Log file name inside the log directory.
const LOG_FILE_NAME: &str = "tassapi.log";

/// Build the subscriber without installing it.
///
/// Console output goes to stderr. File output goes to a daily-rotated
/// `tassapi.log` under `log_dir`, as plain text or one JSON object per line.
pub fn build_subscriber(
    level: &str,
    log_dir: &Path,
    json_output: bool,
) -> TassResult<(impl Subscriber + Send + Sync + 'static, LogGuard)> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .compact();

    let json_layer = json_output.then(|| {
        fmt::layer()
            .with_writer(writer.clone())
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
    });
    let text_layer = (!json_output).then(|| {
        fmt::layer()
            .with_writer(writer.clone())
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(json_layer)
        .with(text_layer);
    Ok((subscriber, LogGuard { _guard: guard }))
}

/// Install the global tracing subscriber.
///
/// # Arguments
/// * `level` - Log level or filter directive, e.g. "info" or "tass_api=debug"
/// * `log_dir` - Directory for log files
/// * `json_output` - If true, use JSON format for file output
///
/// Fails with [`TassError::Config`] when a global subscriber is already set.
pub fn init_logging(level: &str, log_dir: &Path, json_output: bool) -> TassResult<LogGuard> {
    let (subscriber, guard) = build_subscriber(level, log_dir, json_output)?;
    subscriber
        .try_init()
        .map_err(|e| TassError::Config(format!("failed to install subscriber: {e}")))?;

    tracing::info!("logging initialized at level={level}, dir={}", log_dir.display());
    Ok(guard)
}

/// Initialize logging from the `[logging]` section of the configuration.
pub fn init_from_config(config: &LoggingConfig) -> TassResult<LogGuard> {
    init_logging(&config.level, &config.effective_directory(), config.json_output)
}

/// Guard that keeps the non-blocking log writer alive.
/// Drop this to flush and close the log file.
pub struct LogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Initialize a minimal console-only logger for testing or simple tools.
pub fn init_console_logging(level: &str) {
    let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).compact())
        .try_init();
}
