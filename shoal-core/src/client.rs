//! Top-level download orchestration: metainfo, tracker, swarm and sink.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::config::ShoalConfig;
use crate::storage::{FileSink, StorageError};
use crate::torrent::parsing::parse_torrent_file;
use crate::torrent::{
    AnnounceRequest, HttpTrackerClient, InfoHash, PeerId, SwarmCoordinator, TorrentError,
    TorrentMetadata, TrackerClient,
};
use crate::ShoalError;

/// Result of a finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub path: PathBuf,
    pub info_hash: InfoHash,
    pub pieces: u32,
    pub bytes: u64,
    pub peers: usize,
    pub elapsed: Duration,
}

/// Downloads single-file torrents into the configured output directory.
///
/// One `PeerId` is generated per client and used for the announce and every
/// peer handshake.
pub struct TorrentClient<T = HttpTrackerClient> {
    config: ShoalConfig,
    tracker: T,
    peer_id: PeerId,
}

impl TorrentClient<HttpTrackerClient> {
    /// Creates a client announcing over HTTP.
    ///
    /// # Errors
    /// - `ShoalError::Configuration` - Configuration failed validation
    /// - `ShoalError::Torrent` - HTTP client could not be built
    pub fn new(config: ShoalConfig) -> Result<Self, ShoalError> {
        config.validate()?;
        let tracker = HttpTrackerClient::new(&config.network)?;
        Ok(Self::with_tracker(config, tracker))
    }
}

impl<T: TrackerClient> TorrentClient<T> {
    pub fn with_tracker(config: ShoalConfig, tracker: T) -> Self {
        Self {
            config,
            tracker,
            peer_id: PeerId::generate(),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Reads a torrent file and downloads its content.
    ///
    /// # Errors
    /// See [`TorrentClient::download`]; additionally `TorrentError::Io` or
    /// `TorrentError::InvalidTorrentFile` when the file cannot be decoded.
    pub async fn download_file(&self, torrent_path: &Path) -> Result<DownloadReport, ShoalError> {
        let metadata = parse_torrent_file(torrent_path).await?;
        self.download(metadata).await
    }

    /// Announces, then downloads the content to `<output_dir>/<name>`.
    ///
    /// # Errors
    /// - `ShoalError::Storage` - Invalid name, or destination not creatable
    /// - `ShoalError::Torrent` - Tracker failure, `NoPeersAvailable`,
    ///   `SwarmExhausted`, or a fatal sink write failure
    pub async fn download(&self, metadata: TorrentMetadata) -> Result<DownloadReport, ShoalError> {
        let destination = self.destination(&metadata.name)?;

        let request = AnnounceRequest {
            info_hash: metadata.info_hash,
            peer_id: self.peer_id,
            port: self.config.network.listen_port,
            uploaded: 0,
            downloaded: 0,
            left: metadata.total_length,
        };
        let announce = self
            .tracker
            .announce(&metadata.announce_url, &request)
            .await?;
        if announce.peers.is_empty() {
            return Err(TorrentError::NoPeersAvailable.into());
        }

        let info_hash = metadata.info_hash;
        let peers = announce.peers.len();
        let mut sink = FileSink::create(&destination, metadata.total_length).await?;
        let coordinator = SwarmCoordinator::new(self.config.clone(), metadata, self.peer_id);
        let summary = coordinator.download(&announce.peers, &mut sink).await?;
        let path = sink.finish().await?;

        tracing::info!(
            "Downloaded {} ({} bytes) in {:.2?}",
            path.display(),
            summary.bytes,
            summary.elapsed
        );

        Ok(DownloadReport {
            path,
            info_hash,
            pieces: summary.pieces,
            bytes: summary.bytes,
            peers,
            elapsed: summary.elapsed,
        })
    }

    /// Resolves the output path; the torrent name must be a bare file name.
    fn destination(&self, name: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(file_name)), None) => {
                Ok(self.config.storage.output_dir.join(file_name))
            }
            _ => Err(StorageError::InvalidPath {
                reason: format!("torrent name {name:?} is not a plain file name"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use async_trait::async_trait;

    use super::*;
    use crate::torrent::AnnounceResponse;

    struct StaticTracker {
        peers: Vec<SocketAddr>,
    }

    #[async_trait]
    impl TrackerClient for StaticTracker {
        async fn announce(
            &self,
            _announce_url: &str,
            request: &AnnounceRequest,
        ) -> Result<AnnounceResponse, TorrentError> {
            assert_eq!(request.left, 25);
            Ok(AnnounceResponse {
                interval: 900,
                peers: self.peers.clone(),
            })
        }
    }

    fn metadata(name: &str) -> TorrentMetadata {
        TorrentMetadata {
            announce_url: "http://tracker.test/announce".to_string(),
            info_hash: InfoHash::new([1u8; 20]),
            name: name.to_string(),
            piece_length: 10,
            piece_hashes: vec![[0u8; 20]; 3],
            total_length: 25,
        }
    }

    fn client(output_dir: &Path, peers: Vec<SocketAddr>) -> TorrentClient<StaticTracker> {
        let mut config = ShoalConfig::for_testing();
        config.storage.output_dir = output_dir.to_path_buf();
        TorrentClient::with_tracker(config, StaticTracker { peers })
    }

    #[tokio::test]
    async fn test_empty_peer_list_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let client = client(dir.path(), Vec::new());

        let result = client.download(metadata("file.bin")).await;
        assert!(matches!(
            result,
            Err(ShoalError::Torrent(TorrentError::NoPeersAvailable))
        ));
        assert!(!dir.path().join("file.bin").exists());
    }

    #[tokio::test]
    async fn test_rejects_names_escaping_output_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let client = client(dir.path(), Vec::new());

        for name in ["../evil", "/etc/passwd", "a/b", "", ".."] {
            let result = client.download(metadata(name)).await;
            assert!(
                matches!(result, Err(ShoalError::Storage(StorageError::InvalidPath { .. }))),
                "{name:?} was accepted"
            );
        }
    }

    #[tokio::test]
    async fn test_unreachable_peers_exhaust_swarm() {
        let dir = tempfile::TempDir::new().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);

        let client = client(dir.path(), vec![dead]);
        let result = client.download(metadata("file.bin")).await;
        assert!(matches!(
            result,
            Err(ShoalError::Torrent(TorrentError::SwarmExhausted { remaining: 3 }))
        ));
    }

    #[test]
    fn test_peer_id_carries_client_tag() {
        let dir = tempfile::TempDir::new().unwrap();
        let client = client(dir.path(), Vec::new());
        assert_eq!(&client.peer_id().as_bytes()[..8], b"-SH0001-");
    }
}
