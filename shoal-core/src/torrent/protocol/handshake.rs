//! BitTorrent handshake serialization and deserialization

use tokio::io::{AsyncRead, AsyncReadExt};

use super::types::{PeerHandshake, PeerId};
use crate::torrent::{InfoHash, TorrentError};

/// Bytes following the protocol name: reserved (8) + info hash (20) + peer id (20).
const HANDSHAKE_TAIL_LEN: usize = 48;

/// Handshake serialization utilities for BitTorrent wire protocol.
pub struct HandshakeCodec;

impl HandshakeCodec {
    /// Serializes handshake message following BEP 3
    pub fn serialize_handshake(handshake: &PeerHandshake) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + handshake.protocol.len() + HANDSHAKE_TAIL_LEN);

        // Protocol name length
        buf.push(handshake.protocol.len() as u8);

        // Protocol name
        buf.extend_from_slice(handshake.protocol.as_bytes());

        // Reserved bytes
        buf.extend_from_slice(&handshake.reserved);

        // Info hash
        buf.extend_from_slice(handshake.info_hash.as_bytes());

        // Peer ID
        buf.extend_from_slice(handshake.peer_id.as_bytes());

        buf
    }

    /// Reads one handshake from the stream.
    ///
    /// Reads the protocol name length, then exactly `48 + length` bytes.
    /// Protocol names other than "BitTorrent protocol" are accepted as long
    /// as the frame is well formed.
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Protocol name length is zero
    /// - `TorrentError::Io` - Stream ended before the full handshake arrived
    pub async fn read_handshake<R>(reader: &mut R) -> Result<PeerHandshake, TorrentError>
    where
        R: AsyncRead + Unpin,
    {
        let protocol_len = reader.read_u8().await? as usize;
        if protocol_len == 0 {
            return Err(TorrentError::protocol("Handshake protocol name length is zero"));
        }

        let mut buf = vec![0u8; 1 + protocol_len + HANDSHAKE_TAIL_LEN];
        buf[0] = protocol_len as u8;
        reader.read_exact(&mut buf[1..]).await?;

        Self::deserialize_handshake(&buf)
    }

    /// Deserializes a complete handshake frame following BEP 3
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Zero protocol name length, or frame
    ///   length differs from the declared one
    pub fn deserialize_handshake(data: &[u8]) -> Result<PeerHandshake, TorrentError> {
        let Some(&declared) = data.first() else {
            return Err(TorrentError::protocol("Handshake too short"));
        };

        let protocol_len = declared as usize;
        if protocol_len == 0 {
            return Err(TorrentError::protocol("Handshake protocol name length is zero"));
        }

        let expected_len = 1 + protocol_len + HANDSHAKE_TAIL_LEN;
        if data.len() != expected_len {
            return Err(TorrentError::protocol(format!(
                "Invalid handshake length: expected {expected_len} bytes, got {}",
                data.len()
            )));
        }

        let protocol = String::from_utf8_lossy(&data[1..1 + protocol_len]).to_string();
        let tail = &data[1 + protocol_len..];

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&tail[..8]);

        let mut info_hash_bytes = [0u8; 20];
        info_hash_bytes.copy_from_slice(&tail[8..28]);

        let mut peer_id_bytes = [0u8; 20];
        peer_id_bytes.copy_from_slice(&tail[28..48]);

        Ok(PeerHandshake {
            protocol,
            reserved,
            info_hash: InfoHash::new(info_hash_bytes),
            peer_id: PeerId::new(peer_id_bytes),
        })
    }
}
