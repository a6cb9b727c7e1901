//! # Logging Setup
//!
//! One `tracing` subscriber per process: an ANSI console layer plus a JSON
//! layer written to a daily rolling file. The filter comes from `RUST_LOG`
//! when set, else from the configured level.

use std::io;
use std::path::Path;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logging could not be initialized.
#[derive(Debug, Error)]
pub enum LogInitError {
    /// The log directory could not be created.
    #[error("cannot create log directory: {0}")]
    Io(#[from] io::Error),
    /// Neither `RUST_LOG` nor the configured level is a valid filter.
    #[error("invalid log filter '{0}'")]
    Filter(String),
    /// A global subscriber is already installed.
    #[error("tracing subscriber already initialized: {0}")]
    AlreadySet(String),
}

/// `RUST_LOG` if present and valid, otherwise `level`.
pub fn build_filter(level: &str) -> Result<EnvFilter, LogInitError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|_| LogInitError::Filter(level.to_string()))
}

/// Installs the global subscriber. Keep the returned guard alive until exit,
/// dropping it flushes the file writer.
pub fn init_tracing(log_dir: &Path, file_prefix: &str, level: &str) -> Result<WorkerGuard, LogInitError> {
    std::fs::create_dir_all(log_dir)?;
    let (writer, guard) = non_blocking(rolling::daily(log_dir, file_prefix));

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer).json();

    tracing_subscriber::registry()
        .with(build_filter(level)?)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LogInitError::AlreadySet(e.to_string()))?;

    tracing::info!(level, dir = %log_dir.display(), "Logging initialized");
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_creates_dir_and_refuses_second_init() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("logs");

        let guard = init_tracing(&dir, "test", "debug").unwrap();
        assert!(dir.is_dir());
        assert!(matches!(init_tracing(&dir, "test", "debug"), Err(LogInitError::AlreadySet(_))));
        drop(guard);
    }
}
