//! Tracing setup for Shoal
//!
//! Console output at the level the user picked, plus an optional full trace
//! log written to disk for post-mortem debugging.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::ShoalError;

/// File name of the trace log inside the logs directory.
pub const LOG_FILE_NAME: &str = "shoal-last-run.log";

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides `console_level` for the console layer. When
/// `logs_dir` is given, every event at trace level is also written to
/// `logs_dir/shoal-last-run.log`, replacing the previous run.
///
/// # Errors
///
/// - `ShoalError::Io` - Logs directory or file could not be created
/// - `ShoalError::Configuration` - A global subscriber is already installed
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<Option<PathBuf>, ShoalError> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));
    let console_layer = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter);

    let (file_layer, log_file_path) = match logs_dir {
        Some(dir) => {
            create_dir_all(dir)?;
            let path = dir.join(LOG_FILE_NAME);
            let log_file = File::create(&path)?;
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(log_file)
                .with_filter(EnvFilter::new("trace"));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ShoalError::Configuration {
            reason: format!("tracing already initialized: {e}"),
        })?;

    match &log_file_path {
        Some(path) => tracing::debug!(
            "Tracing initialized: console={}, trace_file={}",
            console_level,
            path.display()
        ),
        None => tracing::debug!("Tracing initialized: console={}", console_level),
    }

    Ok(log_file_path)
}

/// CLI log levels for user control
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error messages
    Error,
    /// Warning and error messages
    Warn,
    /// Progress, warning, and error messages
    Info,
    /// Per-peer diagnostics
    Debug,
    /// Everything, including per-message protocol traces
    Trace,
}

impl CliLogLevel {
    /// Converts CLI log level to tracing Level enum.
    ///
    /// # Examples
    /// ```
    /// use shoal_core::tracing_setup::CliLogLevel;
    ///
    /// let level = CliLogLevel::Info.as_tracing_level();
    /// assert_eq!(level, tracing::Level::INFO);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CliLogLevel::Error => "error",
            CliLogLevel::Warn => "warn",
            CliLogLevel::Info => "info",
            CliLogLevel::Debug => "debug",
            CliLogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(CliLogLevel::Error.as_tracing_level(), Level::ERROR);
        assert_eq!(CliLogLevel::Trace.as_tracing_level(), Level::TRACE);
        assert_eq!(CliLogLevel::Warn.to_string(), "warn");
    }

    #[test]
    fn test_file_layer_creates_log_and_second_init_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let logs = dir.path().join("logs");

        let path = init_tracing(Level::WARN, Some(&logs)).unwrap();
        assert_eq!(path, Some(logs.join(LOG_FILE_NAME)));
        assert!(logs.join(LOG_FILE_NAME).exists());

        let again = init_tracing(Level::WARN, None);
        assert!(matches!(again, Err(ShoalError::Configuration { .. })));
    }
}
