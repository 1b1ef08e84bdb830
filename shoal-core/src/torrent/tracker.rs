//! HTTP tracker announce: request URL building and response decoding

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use async_trait::async_trait;
use url::Url;

use super::protocol::PeerId;
use super::{InfoHash, TorrentError};
use crate::config::NetworkConfig;

/// Tracker announce request.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// Torrent being announced
    pub info_hash: InfoHash,
    /// Session peer id, identical to the one sent in handshakes
    pub peer_id: PeerId,
    /// Port reported as listening for peers
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    /// Bytes remaining to download
    pub left: u64,
}

/// Tracker announce response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceResponse {
    /// Seconds until the tracker expects the next announce
    pub interval: u32,
    pub peers: Vec<SocketAddr>,
}

/// Source of peer addresses for a torrent.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Announces to the tracker at `announce_url` and returns its peer list.
    ///
    /// # Errors
    /// - `TorrentError::TrackerConnectionFailed` - Request failed or non-2xx status
    /// - `TorrentError::TrackerRejected` - Tracker returned a failure reason
    /// - `TorrentError::ProtocolError` - Response could not be decoded
    async fn announce(
        &self,
        announce_url: &str,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, TorrentError>;
}

/// Tracker client speaking the HTTP announce protocol.
pub struct HttpTrackerClient {
    client: reqwest::Client,
}

impl HttpTrackerClient {
    /// Creates a client using the tracker timeout and user agent from `config`.
    ///
    /// # Errors
    /// - `TorrentError::Http` - HTTP client could not be built
    pub fn new(config: &NetworkConfig) -> Result<Self, TorrentError> {
        let client = reqwest::Client::builder()
            .timeout(config.tracker_timeout)
            .user_agent(config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()?;
        Ok(Self { client })
    }

    /// Appends announce parameters to the tracker URL.
    ///
    /// Binary fields are percent-encoded byte by byte; an existing query on
    /// the announce URL is kept.
    ///
    /// # Errors
    /// - `TorrentError::UrlParsing` - Announce URL is not a valid URL
    /// - `TorrentError::TrackerConnectionFailed` - Scheme is not http(s)
    pub fn build_announce_url(
        announce_url: &str,
        request: &AnnounceRequest,
    ) -> Result<Url, TorrentError> {
        let mut url = Url::parse(announce_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TorrentError::TrackerConnectionFailed {
                url: announce_url.to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let params = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            urlencoding::encode_binary(request.info_hash.as_bytes()),
            urlencoding::encode_binary(request.peer_id.as_bytes()),
            request.port,
            request.uploaded,
            request.downloaded,
            request.left,
        );
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{params}"),
            _ => params,
        };
        url.set_query(Some(&query));

        Ok(url)
    }

    /// Decodes a bencoded announce response.
    ///
    /// # Errors
    /// - `TorrentError::TrackerRejected` - Response carries `failure reason`
    /// - `TorrentError::ProtocolError` - Malformed bencode or peer list
    pub fn parse_announce_response(body: &[u8]) -> Result<AnnounceResponse, TorrentError> {
        let parsed = bencode_rs::Value::parse(body).map_err(|e| {
            TorrentError::protocol(format!("Failed to parse tracker response: {e:?}"))
        })?;

        let Some(bencode_rs::Value::Dictionary(dict)) = parsed.first() else {
            return Err(TorrentError::protocol(
                "Tracker response is not a dictionary",
            ));
        };

        if let Some(bencode_rs::Value::Bytes(reason)) = dict.get(b"failure reason".as_slice()) {
            return Err(TorrentError::TrackerRejected {
                reason: String::from_utf8_lossy(reason).to_string(),
            });
        }

        let interval = match dict.get(b"interval".as_slice()) {
            Some(bencode_rs::Value::Integer(value)) => u32::try_from(*value).map_err(|_| {
                TorrentError::protocol(format!("Invalid tracker interval {value}"))
            })?,
            _ => {
                return Err(TorrentError::protocol(
                    "Missing interval in tracker response",
                ));
            }
        };

        let peers = match dict.get(b"peers".as_slice()) {
            Some(bencode_rs::Value::Bytes(compact)) => Self::parse_compact_peers(compact)?,
            Some(bencode_rs::Value::List(entries)) => Self::parse_peer_dicts(entries)?,
            _ => {
                return Err(TorrentError::protocol(
                    "Missing peers in tracker response",
                ));
            }
        };

        Ok(AnnounceResponse { interval, peers })
    }

    /// Decodes 6 bytes per peer: IPv4 address then big-endian port.
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Length is not a multiple of 6
    pub fn parse_compact_peers(peer_bytes: &[u8]) -> Result<Vec<SocketAddr>, TorrentError> {
        if !peer_bytes.len().is_multiple_of(6) {
            return Err(TorrentError::protocol(format!(
                "Invalid compact peer data length {}",
                peer_bytes.len()
            )));
        }

        Ok(peer_bytes
            .chunks_exact(6)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                SocketAddr::V4(SocketAddrV4::new(ip, port))
            })
            .collect())
    }

    fn parse_peer_dicts(entries: &[bencode_rs::Value<'_>]) -> Result<Vec<SocketAddr>, TorrentError> {
        let mut peers = Vec::with_capacity(entries.len());
        for entry in entries {
            let bencode_rs::Value::Dictionary(peer) = entry else {
                return Err(TorrentError::protocol("Peer entry is not a dictionary"));
            };

            let ip = match peer.get(b"ip".as_slice()) {
                Some(bencode_rs::Value::Bytes(ip)) => String::from_utf8_lossy(ip)
                    .parse::<IpAddr>()
                    .map_err(|e| TorrentError::protocol(format!("Invalid peer ip: {e}")))?,
                _ => return Err(TorrentError::protocol("Peer entry missing ip")),
            };
            let port = match peer.get(b"port".as_slice()) {
                Some(bencode_rs::Value::Integer(port)) => u16::try_from(*port)
                    .map_err(|_| TorrentError::protocol(format!("Invalid peer port {port}")))?,
                _ => return Err(TorrentError::protocol("Peer entry missing port")),
            };

            peers.push(SocketAddr::new(ip, port));
        }
        Ok(peers)
    }
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    async fn announce(
        &self,
        announce_url: &str,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, TorrentError> {
        let url = Self::build_announce_url(announce_url, request)?;
        tracing::debug!("Announcing to tracker: {}", announce_url);

        let response = self.client.get(url).send().await.map_err(|e| {
            tracing::warn!("HTTP request to {} failed: {}", announce_url, e);
            TorrentError::TrackerConnectionFailed {
                url: announce_url.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Tracker {} returned error status: {}", announce_url, status);
            return Err(TorrentError::TrackerConnectionFailed {
                url: announce_url.to_string(),
                reason: format!("HTTP status {status}"),
            });
        }

        let body = response.bytes().await?;
        let announce = Self::parse_announce_response(&body)?;
        tracing::info!(
            "Tracker returned {} peers (interval {}s)",
            announce.peers.len(),
            announce.interval
        );
        Ok(announce)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    fn request() -> AnnounceRequest {
        let mut hash = [0u8; 20];
        hash[0] = 0xd8;
        hash[1] = b'A';
        hash[2] = b' ';
        AnnounceRequest {
            info_hash: InfoHash::new(hash),
            peer_id: PeerId::new(*b"-SH0001-abcdefghijkl"),
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 25,
        }
    }

    #[test]
    fn test_build_announce_url_encodes_binary_fields() {
        let url =
            HttpTrackerClient::build_announce_url("http://tracker.test/announce", &request())
                .unwrap();
        let query = url.query().unwrap();

        assert!(query.starts_with("info_hash=%D8A%20%00%00"));
        assert!(query.contains("&peer_id=-SH0001-abcdefghijkl&"));
        assert!(query.contains("&port=6881&uploaded=0&downloaded=0&left=25&compact=1"));
    }

    #[test]
    fn test_build_announce_url_keeps_existing_query() {
        let url = HttpTrackerClient::build_announce_url(
            "https://tracker.test/announce?passkey=abc",
            &request(),
        )
        .unwrap();
        assert!(url.query().unwrap().starts_with("passkey=abc&info_hash="));
    }

    #[test]
    fn test_build_announce_url_rejects_udp() {
        let result =
            HttpTrackerClient::build_announce_url("udp://tracker.test:80/announce", &request());
        assert!(matches!(
            result,
            Err(TorrentError::TrackerConnectionFailed { .. })
        ));
        assert!(HttpTrackerClient::build_announce_url("not a url", &request()).is_err());
    }

    #[test]
    fn test_parse_compact_peers() {
        let body = b"d8:intervali900e5:peers12:\x7f\x00\x00\x01\x1a\xe1\x0a\x00\x00\x02\x00\x50e";
        let response = HttpTrackerClient::parse_announce_response(body).unwrap();

        assert_eq!(response.interval, 900);
        assert_eq!(
            response.peers,
            vec![
                "127.0.0.1:6881".parse().unwrap(),
                "10.0.0.2:80".parse().unwrap()
            ]
        );
    }

    #[test]
    fn test_parse_dictionary_peers() {
        let body = b"d8:intervali60e5:peersld2:ip9:127.0.0.14:porti7000eed2:ip3:::14:porti7001eeee";
        let response = HttpTrackerClient::parse_announce_response(body).unwrap();
        assert_eq!(
            response.peers,
            vec![
                "127.0.0.1:7000".parse().unwrap(),
                "[::1]:7001".parse().unwrap()
            ]
        );
    }

    #[test]
    fn test_failure_reason_is_rejection() {
        let body = b"d14:failure reason17:torrent not founde";
        let result = HttpTrackerClient::parse_announce_response(body);
        assert!(matches!(
            result,
            Err(TorrentError::TrackerRejected { reason }) if reason == "torrent not found"
        ));
    }

    #[test]
    fn test_malformed_responses() {
        assert!(HttpTrackerClient::parse_compact_peers(&[1, 2, 3, 4, 5]).is_err());
        assert!(HttpTrackerClient::parse_announce_response(b"d5:peers0:e").is_err());
        assert!(HttpTrackerClient::parse_announce_response(b"i5e").is_err());
    }

    #[test]
    fn test_interval_out_of_range() {
        for body in [
            b"d8:intervali4294967296e5:peers0:e".as_slice(),
            b"d8:intervali-1e5:peers0:e".as_slice(),
        ] {
            let error = HttpTrackerClient::parse_announce_response(body).unwrap_err();
            assert!(matches!(error, TorrentError::ProtocolError { message } if message.contains("interval")));
        }
    }

    #[tokio::test]
    async fn test_announce_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let read = socket.read(&mut request).await.unwrap();
            let request_line = String::from_utf8_lossy(&request[..read])
                .lines()
                .next()
                .unwrap_or_default()
                .to_string();

            let body = b"d8:intervali30e5:peers6:\x7f\x00\x00\x01\x1a\xe1e";
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            request_line
        });

        let client = HttpTrackerClient::new(&NetworkConfig::default()).unwrap();
        let announce_url = format!("http://{address}/announce");
        let response = client.announce(&announce_url, &request()).await.unwrap();

        assert_eq!(response.peers, vec!["127.0.0.1:6881".parse().unwrap()]);
        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /announce?info_hash="));
    }

    #[tokio::test]
    async fn test_announce_error_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket
                .write_all(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n")
                .await;
        });

        let client = HttpTrackerClient::new(&NetworkConfig::default()).unwrap();
        let result = client
            .announce(&format!("http://{address}/announce"), &request())
            .await;
        assert!(matches!(
            result,
            Err(TorrentError::TrackerConnectionFailed { .. })
        ));
    }
}
