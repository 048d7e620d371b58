//! File logging for the detached daemon.
//!
//! The daemon child runs without stdio, so its `tracing` output goes to
//! `<vault>/.touchlog/daemon.log` through a non-blocking appender.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use touchlog_config::VaultPaths;

/// Errors from daemon log initialisation.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to create log directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open daemon log: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("invalid log filter {filter:?}: {source}")]
    Filter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },
}

/// Build the daemon's filter: `RUST_LOG` when set, otherwise `level`.
pub fn daemon_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|source| LoggingError::Filter {
        filter: level.to_string(),
        source,
    })
}

/// Install a global subscriber that appends to the vault's `daemon.log`.
///
/// The returned guard flushes buffered lines when dropped and must be held
/// for as long as the daemon runs. If a global subscriber is already set
/// (e.g. in tests), the existing one is kept.
pub fn init_daemon_logging(paths: &VaultPaths, level: &str) -> Result<WorkerGuard, LoggingError> {
    std::fs::create_dir_all(&paths.meta_dir)?;

    let file_name = paths
        .log_file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("daemon.log");
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(&paths.meta_dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = daemon_filter(level)?;
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(writer);

    if tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("global subscriber already installed, daemon log not attached");
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_filter_accepts_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(daemon_filter(level).is_ok(), "level {level}");
        }
    }

    #[test]
    fn test_init_creates_log_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = VaultPaths::new(dir.path());
        let guard = init_daemon_logging(&paths, "info").unwrap();
        drop(guard);
        assert!(paths.meta_dir.is_dir());
    }
}
