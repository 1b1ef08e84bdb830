//! HTTP announce endpoint returning a fixed peer list

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::routing::get;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::fixtures::{put_bytes, put_integer};

/// Announce interval handed out to clients, in seconds.
pub const ANNOUNCE_INTERVAL: i64 = 900;

/// Fields of one announce as received by the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnounceRecord {
    pub info_hash: Vec<u8>,
    pub peer_id: Vec<u8>,
    pub port: Option<u16>,
    pub left: Option<u64>,
    pub compact: bool,
}

struct TrackerState {
    peers: Vec<SocketAddr>,
    failure: Option<String>,
    announces: Mutex<Vec<AnnounceRecord>>,
}

/// Tracker serving `GET /announce` on an ephemeral loopback port.
pub struct SimulatedTracker {
    address: SocketAddr,
    state: Arc<TrackerState>,
    task: JoinHandle<()>,
}

impl SimulatedTracker {
    /// Starts a tracker that answers every announce with `peers`.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - If the listener could not be bound
    pub async fn spawn(peers: Vec<SocketAddr>) -> std::io::Result<Self> {
        Self::start(peers, None).await
    }

    /// Starts a tracker that rejects every announce with `reason`.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - If the listener could not be bound
    pub async fn failing(reason: &str) -> std::io::Result<Self> {
        Self::start(Vec::new(), Some(reason.to_string())).await
    }

    async fn start(peers: Vec<SocketAddr>, failure: Option<String>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let state = Arc::new(TrackerState {
            peers,
            failure,
            announces: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/announce", get(announce))
            .with_state(Arc::clone(&state));
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Simulated tracker stopped: {}", e);
            }
        });

        tracing::debug!("Simulated tracker listening on {}", address);
        Ok(Self {
            address,
            state,
            task,
        })
    }

    pub fn announce_url(&self) -> String {
        format!("http://{}/announce", self.address)
    }

    /// Every announce received so far, oldest first.
    pub fn announces(&self) -> Vec<AnnounceRecord> {
        self.state.announces.lock().clone()
    }
}

impl Drop for SimulatedTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn announce(
    State(state): State<Arc<TrackerState>>,
    RawQuery(query): RawQuery,
) -> Vec<u8> {
    let record = parse_query(query.as_deref().unwrap_or_default());
    state.announces.lock().push(record);

    let mut body = b"d".to_vec();
    if let Some(reason) = &state.failure {
        put_bytes(&mut body, b"failure reason");
        put_bytes(&mut body, reason.as_bytes());
    } else {
        put_bytes(&mut body, b"interval");
        put_integer(&mut body, ANNOUNCE_INTERVAL);
        put_bytes(&mut body, b"peers");
        put_bytes(&mut body, &compact_peers(&state.peers));
    }
    body.push(b'e');
    body
}

fn parse_query(query: &str) -> AnnounceRecord {
    let mut record = AnnounceRecord::default();
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key {
            "info_hash" => record.info_hash = urlencoding::decode_binary(value.as_bytes()).into_owned(),
            "peer_id" => record.peer_id = urlencoding::decode_binary(value.as_bytes()).into_owned(),
            "port" => record.port = value.parse().ok(),
            "left" => record.left = value.parse().ok(),
            "compact" => record.compact = value == "1",
            _ => {}
        }
    }
    record
}

/// IPv4 peers as 6 bytes each; IPv6 peers are left out.
fn compact_peers(peers: &[SocketAddr]) -> Vec<u8> {
    let mut out = Vec::with_capacity(peers.len() * 6);
    for peer in peers {
        if let IpAddr::V4(ip) = peer.ip() {
            out.extend_from_slice(&ip.octets());
            out.extend_from_slice(&peer.port().to_be_bytes());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use shoal_core::config::NetworkConfig;
    use shoal_core::torrent::{
        AnnounceRequest, HttpTrackerClient, InfoHash, PeerId, TorrentError, TrackerClient,
    };

    use super::*;

    fn request() -> AnnounceRequest {
        AnnounceRequest {
            info_hash: InfoHash::new([0xab; 20]),
            peer_id: PeerId::new(*b"-SH0001-000000000000"),
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 4096,
        }
    }

    #[tokio::test]
    async fn test_announce_returns_peers_and_records_request() {
        let peers: Vec<SocketAddr> = vec![
            "127.0.0.1:7001".parse().unwrap(),
            "127.0.0.1:7002".parse().unwrap(),
        ];
        let tracker = SimulatedTracker::spawn(peers.clone()).await.unwrap();
        let client = HttpTrackerClient::new(&NetworkConfig::default()).unwrap();

        let response = client
            .announce(&tracker.announce_url(), &request())
            .await
            .unwrap();
        assert_eq!(response.peers, peers);
        assert_eq!(response.interval, ANNOUNCE_INTERVAL as u32);

        let announces = tracker.announces();
        assert_eq!(announces.len(), 1);
        assert_eq!(announces[0].info_hash, vec![0xab; 20]);
        assert_eq!(announces[0].peer_id, b"-SH0001-000000000000".to_vec());
        assert_eq!(announces[0].port, Some(6881));
        assert_eq!(announces[0].left, Some(4096));
        assert!(announces[0].compact);
    }

    #[tokio::test]
    async fn test_failing_tracker_rejects() {
        let tracker = SimulatedTracker::failing("unregistered torrent").await.unwrap();
        let client = HttpTrackerClient::new(&NetworkConfig::default()).unwrap();

        let result = client.announce(&tracker.announce_url(), &request()).await;
        assert!(matches!(
            result,
            Err(TorrentError::TrackerRejected { reason }) if reason == "unregistered torrent"
        ));
    }

    #[test]
    fn test_compact_peers_skip_ipv6() {
        let peers: Vec<SocketAddr> = vec!["[::1]:80".parse().unwrap(), "10.0.0.1:258".parse().unwrap()];
        assert_eq!(compact_peers(&peers), vec![10, 0, 0, 1, 1, 2]);
    }
}
