// Logging module - tracing subscriber setup
//
// Human-readable logs go to stdout. When file logging is enabled, the same
// events are also written as JSON to a rotating file through a non-blocking
// writer; the returned guard must live until shutdown so buffered lines flush.

use crate::config::{LogRotation, LoggingConfig};
use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter directive for a configured level
///
/// Precedence: RUST_LOG env var > config file > default "info"
pub fn default_directive(level: &str) -> String {
    format!("livewatch={}", level.trim().to_lowercase())
}

/// Rolling file appender for the configured rotation
pub fn file_appender(config: &LoggingConfig) -> RollingFileAppender {
    let (dir, prefix) = (&config.file_dir, &config.file_prefix);
    match config.file_rotation {
        LogRotation::Hourly => tracing_appender::rolling::hourly(dir, prefix),
        LogRotation::Daily => tracing_appender::rolling::daily(dir, prefix),
        LogRotation::Never => tracing_appender::rolling::never(dir, prefix),
    }
}

/// Install the global subscriber
///
/// Returns the file writer guard when file logging is active. If the log
/// directory cannot be created, file logging is skipped with a warning and
/// stdout logging still comes up.
pub fn init(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

    let mut guard = None;
    let file_layer = if config.file_enabled {
        match std::fs::create_dir_all(&config.file_dir) {
            Ok(()) => {
                // Writes happen on a background thread
                let (non_blocking, file_guard) =
                    tracing_appender::non_blocking(file_appender(config));
                guard = Some(file_guard);
                Some(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not create log directory {:?}: {}",
                    config.file_dir, e
                );
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}
