//! BitTorrent wire protocol message serialization and deserialization

use bytes::{Buf, BufMut, Bytes};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::types::{Message, MessageId};
use crate::torrent::{PieceIndex, TorrentError};

/// Upper bound on a single frame; large enough for a 16M-piece bitfield or a
/// 128 KiB block.
pub const MAX_MESSAGE_LENGTH: u32 = 2 * 1024 * 1024;

/// Message serialization utilities for BitTorrent wire protocol.
pub struct MessageCodec;

impl MessageCodec {
    /// Serializes a frame following BEP 3.
    ///
    /// `None` produces the four zero bytes of a keep-alive.
    pub fn serialize_message(message: Option<&Message>) -> Vec<u8> {
        let Some(message) = message else {
            return vec![0u8; 4];
        };

        let mut buf = Vec::with_capacity(5 + message.payload.len());
        buf.put_u32(message.payload.len() as u32 + 1);
        buf.put_u8(message.id.into());
        buf.extend_from_slice(&message.payload);
        buf
    }

    /// Reads one frame from the stream.
    ///
    /// Returns `Ok(None)` for a keep-alive; callers read again.
    ///
    /// # Errors
    /// - `TorrentError::Io` - Stream ended mid-frame or failed
    /// - `TorrentError::ProtocolError` - Frame exceeds `MAX_MESSAGE_LENGTH`
    pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>, TorrentError>
    where
        R: AsyncRead + Unpin,
    {
        let length = reader.read_u32().await?;
        if length == 0 {
            return Ok(None);
        }

        if length > MAX_MESSAGE_LENGTH {
            return Err(TorrentError::protocol(format!(
                "Message length {length} exceeds limit of {MAX_MESSAGE_LENGTH}"
            )));
        }

        let mut frame = vec![0u8; length as usize];
        reader.read_exact(&mut frame).await?;

        let mut frame = Bytes::from(frame);
        let id = MessageId::from(frame.get_u8());
        Ok(Some(Message { id, payload: frame }))
    }

    /// Extracts the piece index from a `have` message.
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Wrong kind or payload not 4 bytes
    pub fn parse_have(message: &Message) -> Result<PieceIndex, TorrentError> {
        if message.id != MessageId::Have {
            return Err(TorrentError::protocol(format!(
                "Expected have message, got {:?}",
                message.id
            )));
        }
        if message.payload.len() != 4 {
            return Err(TorrentError::protocol(format!(
                "Invalid have payload length {}",
                message.payload.len()
            )));
        }

        let mut payload = message.payload.as_ref();
        Ok(PieceIndex::new(payload.get_u32()))
    }

    /// Extracts `(index, begin, length)` from a `request` or `cancel` message.
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Wrong kind or payload not 12 bytes
    pub fn parse_request(message: &Message) -> Result<(PieceIndex, u32, u32), TorrentError> {
        if !matches!(message.id, MessageId::Request | MessageId::Cancel) {
            return Err(TorrentError::protocol(format!(
                "Expected request message, got {:?}",
                message.id
            )));
        }
        if message.payload.len() != 12 {
            return Err(TorrentError::protocol(format!(
                "Invalid request payload length {}",
                message.payload.len()
            )));
        }

        let mut payload = message.payload.as_ref();
        let index = PieceIndex::new(payload.get_u32());
        let begin = payload.get_u32();
        let length = payload.get_u32();
        Ok((index, begin, length))
    }

    /// Copies the block of a `piece` message into `buf` at its offset.
    ///
    /// Returns the number of bytes copied.
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Wrong kind, payload shorter than 8
    ///   bytes, index differs from `expected`, or block outside `buf`
    pub fn parse_piece(
        expected: PieceIndex,
        buf: &mut [u8],
        message: &Message,
    ) -> Result<usize, TorrentError> {
        if message.id != MessageId::Piece {
            return Err(TorrentError::protocol(format!(
                "Expected piece message, got {:?}",
                message.id
            )));
        }
        if message.payload.len() < 8 {
            return Err(TorrentError::protocol(format!(
                "Piece payload too short: {} bytes",
                message.payload.len()
            )));
        }

        let mut header = &message.payload[..8];
        let index = PieceIndex::new(header.get_u32());
        if index != expected {
            return Err(TorrentError::protocol(format!(
                "Expected piece {expected}, got {index}"
            )));
        }

        let begin = header.get_u32() as usize;
        if begin >= buf.len() {
            return Err(TorrentError::protocol(format!(
                "Block offset {begin} beyond piece length {}",
                buf.len()
            )));
        }

        let block = &message.payload[8..];
        if begin + block.len() > buf.len() {
            return Err(TorrentError::protocol(format!(
                "Block of {} bytes at offset {begin} overflows piece length {}",
                block.len(),
                buf.len()
            )));
        }

        buf[begin..begin + block.len()].copy_from_slice(block);
        Ok(block.len())
    }
}
