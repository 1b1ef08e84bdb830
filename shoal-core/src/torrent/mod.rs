//! BitTorrent peer wire protocol and swarm download implementation

pub mod bitfield;
pub mod parsing;
pub mod peer_connection;
pub mod piece_download;
pub mod protocol;
pub mod swarm;
pub mod tracker;
pub mod work_queue;

use std::fmt;
use std::net::SocketAddr;

pub use bitfield::Bitfield;
pub use parsing::{TorrentMetadata, parse_torrent_data};
pub use peer_connection::PeerConnection;
pub use piece_download::{PieceDownloader, PieceProgress, PieceResult, PieceWork};
pub use protocol::{HandshakeCodec, Message, MessageCodec, MessageId, PeerHandshake, PeerId};
pub use swarm::{AttemptOutcome, DownloadSummary, SwarmCoordinator};
pub use tracker::{AnnounceRequest, AnnounceResponse, HttpTrackerClient, TrackerClient};
pub use work_queue::WorkQueue;

use crate::storage::StorageError;

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary from a torrent file.
/// Every peer connection of a download is bound to it by the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Zero-based index of a piece within a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur during torrent operations.
///
/// Covers wire protocol failures, per-peer download failures, metainfo and
/// tracker problems, and failures of the destination storage.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out during {phase}")]
    Timeout { phase: &'static str },

    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error("Handshake info hash mismatch: expected {expected}, received {received}")]
    HandshakeMismatch {
        expected: InfoHash,
        received: InfoHash,
    },

    #[error("Piece {index} hash mismatch")]
    PieceHashMismatch { index: PieceIndex },

    #[error("Peer does not have piece {index}")]
    PieceUnavailable { index: PieceIndex },

    #[error("Peer {address} is banned after {retries} failed attempts")]
    PeerBanned { address: SocketAddr, retries: u32 },

    #[error("Failed to parse torrent file: {reason}")]
    InvalidTorrentFile { reason: String },

    #[error("Tracker connection failed: {url} ({reason})")]
    TrackerConnectionFailed { url: String, reason: String },

    #[error("Tracker rejected announce: {reason}")]
    TrackerRejected { reason: String },

    #[error("No peers available for torrent")]
    NoPeersAvailable,

    #[error("All peer workers exited with {remaining} pieces outstanding")]
    SwarmExhausted { remaining: u32 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("URL parsing error")]
    UrlParsing(#[from] url::ParseError),

    #[error("HTTP error")]
    Http(#[from] reqwest::Error),
}

impl TorrentError {
    /// Builds a protocol error from any displayable message.
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        TorrentError::ProtocolError {
            message: message.into(),
        }
    }

    /// Checks if the failure was a deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TorrentError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_hash_display() {
        let hash = [
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef, 0x01, 0x23, 0x45, 0x67,
        ];
        let info_hash = InfoHash::new(hash);
        assert_eq!(
            info_hash.to_string(),
            "0123456789abcdef0123456789abcdef01234567"
        );
    }

    #[test]
    fn test_piece_index_ordering() {
        let piece1 = PieceIndex::new(5);
        let piece2 = PieceIndex::new(10);
        assert!(piece1 < piece2);
        assert_eq!(piece1.as_u32(), 5);
        assert_eq!(piece2.to_string(), "10");
    }

    #[test]
    fn test_handshake_mismatch_names_both_hashes() {
        let error = TorrentError::HandshakeMismatch {
            expected: InfoHash::new([0xaa; 20]),
            received: InfoHash::new([0xbb; 20]),
        };
        let text = error.to_string();
        assert!(text.contains(&"aa".repeat(20)));
        assert!(text.contains(&"bb".repeat(20)));
        assert!(!error.is_timeout());
        assert!(TorrentError::Timeout { phase: "handshake" }.is_timeout());
    }
}
