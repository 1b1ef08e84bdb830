//! Core types and enumerations for BitTorrent wire protocol

use bytes::{BufMut, Bytes, BytesMut};

use crate::torrent::{InfoHash, PieceIndex};

/// Protocol identifier sent in every handshake.
pub const PROTOCOL_NAME: &str = "BitTorrent protocol";

/// Client tag placed at the start of generated peer ids.
pub const CLIENT_TAG: &[u8; 8] = b"-SH0001-";

/// BitTorrent peer identifier.
///
/// 20-byte identifier for peers in the BitTorrent network.
/// Generated once per session and reused for every connection and announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// Creates peer ID from 20-byte array.
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    /// Returns peer ID as byte array reference.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Generate random peer ID for this client.
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(CLIENT_TAG);
        // ThreadRng is a CSPRNG
        for byte in &mut id[8..] {
            *byte = rand::random();
        }
        Self(id)
    }
}

/// Peer handshake information.
///
/// Initial exchange between peers to establish protocol compatibility
/// and verify info hash matching for torrent verification.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerHandshake {
    /// Protocol identifier string ("BitTorrent protocol")
    pub protocol: String,
    /// Reserved bytes for protocol extensions
    pub reserved: [u8; 8],
    /// Info hash of the torrent being shared
    pub info_hash: InfoHash,
    /// Unique identifier for the peer
    pub peer_id: PeerId,
}

impl PeerHandshake {
    /// Create handshake for BitTorrent protocol.
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }
}

/// Wire message kinds.
///
/// Ids outside BEP 3 (port, fast extension, extension protocol) are kept as
/// `Unknown` so a connection can skip them instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have,
    Bitfield,
    Request,
    Piece,
    Cancel,
    Unknown(u8),
}

impl From<u8> for MessageId {
    fn from(id: u8) -> Self {
        match id {
            0 => MessageId::Choke,
            1 => MessageId::Unchoke,
            2 => MessageId::Interested,
            3 => MessageId::NotInterested,
            4 => MessageId::Have,
            5 => MessageId::Bitfield,
            6 => MessageId::Request,
            7 => MessageId::Piece,
            8 => MessageId::Cancel,
            other => MessageId::Unknown(other),
        }
    }
}

impl From<MessageId> for u8 {
    fn from(id: MessageId) -> Self {
        match id {
            MessageId::Choke => 0,
            MessageId::Unchoke => 1,
            MessageId::Interested => 2,
            MessageId::NotInterested => 3,
            MessageId::Have => 4,
            MessageId::Bitfield => 5,
            MessageId::Request => 6,
            MessageId::Piece => 7,
            MessageId::Cancel => 8,
            MessageId::Unknown(other) => other,
        }
    }
}

/// A framed wire message: one kind byte and its raw payload.
///
/// Keep-alives carry no kind and are never represented by this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub payload: Bytes,
}

impl Message {
    /// Creates a message with the given payload.
    pub fn new(id: MessageId, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// Creates a message without payload (choke, unchoke, interested, ...).
    pub fn empty(id: MessageId) -> Self {
        Self {
            id,
            payload: Bytes::new(),
        }
    }

    /// Announces possession of a piece.
    pub fn have(index: PieceIndex) -> Self {
        Self::new(
            MessageId::Have,
            Bytes::copy_from_slice(&index.as_u32().to_be_bytes()),
        )
    }

    /// Requests `length` bytes of piece `index` starting at `begin`.
    pub fn request(index: PieceIndex, begin: u32, length: u32) -> Self {
        Self::new(MessageId::Request, Self::block_triplet(index, begin, length))
    }

    /// Delivers a block of piece data.
    pub fn piece(index: PieceIndex, begin: u32, block: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(8 + block.len());
        payload.put_u32(index.as_u32());
        payload.put_u32(begin);
        payload.extend_from_slice(block);
        Self::new(MessageId::Piece, payload.freeze())
    }

    fn block_triplet(index: PieceIndex, begin: u32, length: u32) -> Bytes {
        let mut payload = BytesMut::with_capacity(12);
        payload.put_u32(index.as_u32());
        payload.put_u32(begin);
        payload.put_u32(length);
        payload.freeze()
    }
}
