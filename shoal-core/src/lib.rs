//! Shoal Core - peer wire protocol engine and swarm download coordinator
//!
//! This crate provides the building blocks for downloading a single file
//! from a BitTorrent swarm: the wire codec, per-peer connections, the
//! pipelined piece download state machine, the swarm coordinator, and the
//! glue around them (metainfo decoding, tracker announce, output sink,
//! configuration and tracing setup).

pub mod client;
pub mod config;
pub mod storage;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use client::{DownloadReport, TorrentClient};
pub use config::ShoalConfig;
pub use storage::{FileSink, PieceSink, StorageError};
pub use torrent::{SwarmCoordinator, TorrentError};

/// Core errors that can bubble up from any Shoal subsystem.
///
/// High-level error types representing failures in core functionality.
#[derive(Debug, thiserror::Error)]
pub enum ShoalError {
    #[error("Torrent error: {0}")]
    Torrent(#[from] TorrentError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShoalError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            ShoalError::Torrent(e) => match e {
                TorrentError::InvalidTorrentFile { reason } => {
                    format!("Invalid torrent file: {reason}")
                }
                TorrentError::TrackerConnectionFailed { url, .. } => {
                    format!("Could not connect to tracker: {url}")
                }
                TorrentError::TrackerRejected { reason } => {
                    format!("Tracker refused the announce: {reason}")
                }
                TorrentError::NoPeersAvailable => "No peers available for download".to_string(),
                TorrentError::SwarmExhausted { remaining } => {
                    format!("Every peer gave up with {remaining} pieces still missing")
                }
                _ => "Download error occurred".to_string(),
            },
            ShoalError::Storage(e) => format!("Could not write the download: {e}"),
            ShoalError::Configuration { reason } => format!("Invalid configuration: {reason}"),
            ShoalError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ShoalError::Configuration { .. }
                | ShoalError::Torrent(TorrentError::InvalidTorrentFile { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, ShoalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors_are_classified() {
        let config_error = ShoalError::Configuration {
            reason: "max backlog must be at least 1".to_string(),
        };
        assert!(config_error.is_user_error());
        assert!(config_error.user_message().contains("max backlog"));

        let torrent_error = ShoalError::from(TorrentError::InvalidTorrentFile {
            reason: "missing info".to_string(),
        });
        assert!(torrent_error.is_user_error());

        let exhausted = ShoalError::from(TorrentError::SwarmExhausted { remaining: 3 });
        assert!(!exhausted.is_user_error());
        assert_eq!(
            exhausted.user_message(),
            "Every peer gave up with 3 pieces still missing"
        );
    }
}
