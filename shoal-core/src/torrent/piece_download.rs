//! Pipelined download of one piece over one peer connection.
//!
//! An attempt either ends with a verified `PieceResult` or fails with an
//! error; the caller requeues the work on failure. All per-attempt state is
//! held in a `PieceProgress` that is discarded when the attempt ends.

use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};

use super::peer_connection::PeerConnection;
use super::protocol::{MessageCodec, MessageId};
use super::{PieceIndex, TorrentError};
use crate::config::DownloadConfig;

/// Immutable description of one piece to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceWork {
    pub index: PieceIndex,
    pub hash: [u8; 20],
    pub length: u32,
}

/// A piece whose data matched its expected hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceResult {
    pub index: PieceIndex,
    pub data: Vec<u8>,
}

/// State of a single attempt at a single piece.
#[derive(Debug)]
pub struct PieceProgress {
    /// Bytes copied into `buf` so far
    pub downloaded: u32,
    /// Bytes covered by sent requests
    pub requested: u32,
    /// Requests sent but not yet answered
    pub backlog: u32,
    pub buf: Vec<u8>,
}

impl PieceProgress {
    fn new(length: u32) -> Self {
        Self {
            downloaded: 0,
            requested: 0,
            backlog: 0,
            buf: vec![0u8; length as usize],
        }
    }

    /// Reads one message and applies it to the connection and this attempt.
    async fn read_message<S>(
        &mut self,
        connection: &mut PeerConnection<S>,
        index: PieceIndex,
        piece_count: u32,
    ) -> Result<(), TorrentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(message) = connection.read_next().await? else {
            return Ok(());
        };

        match message.id {
            MessageId::Unchoke => connection.set_choked(false),
            MessageId::Choke => connection.set_choked(true),
            MessageId::Have => {
                let announced = MessageCodec::parse_have(&message)?;
                if announced.as_u32() >= piece_count {
                    return Err(TorrentError::protocol(format!(
                        "Have for piece {announced} beyond piece count {piece_count}"
                    )));
                }
                connection.bitfield_mut().set_piece(announced.as_u32());
            }
            MessageId::Piece => {
                let written = MessageCodec::parse_piece(index, &mut self.buf, &message)?;
                self.downloaded += written as u32;
                self.backlog = self.backlog.saturating_sub(1);
            }
            other => {
                tracing::trace!("Ignoring {:?} from {}", other, connection.address());
            }
        }

        Ok(())
    }
}

/// Drives piece attempts on a connection according to the download tunables.
#[derive(Debug, Clone)]
pub struct PieceDownloader {
    config: DownloadConfig,
    piece_count: u32,
}

impl PieceDownloader {
    /// `piece_count` bounds the piece indices a peer may announce.
    pub fn new(config: DownloadConfig, piece_count: u32) -> Self {
        Self {
            config,
            piece_count,
        }
    }

    /// Attempts to download and verify one piece from the peer.
    ///
    /// Every failure except `PeerBanned` increments the peer's retry counter.
    /// The stall deadline covers the whole attempt and is cleared before
    /// returning.
    ///
    /// # Errors
    /// - `TorrentError::PeerBanned` - Peer exhausted its retry budget; no bytes sent
    /// - `TorrentError::PieceUnavailable` - Peer does not advertise the piece
    /// - `TorrentError::Timeout` - Stall deadline expired
    /// - `TorrentError::Io` / `TorrentError::ProtocolError` - Connection or framing failure,
    ///   or a `have` for a piece index past the torrent's piece count
    /// - `TorrentError::PieceHashMismatch` - Downloaded data failed verification
    pub async fn download<S>(
        &self,
        connection: &mut PeerConnection<S>,
        work: &PieceWork,
    ) -> Result<PieceResult, TorrentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if connection.retries() >= self.config.max_retries {
            connection.ban();
            return Err(TorrentError::PeerBanned {
                address: connection.address(),
                retries: connection.retries(),
            });
        }

        if !connection.bitfield().has_piece(work.index.as_u32()) {
            connection.record_failure();
            return Err(TorrentError::PieceUnavailable { index: work.index });
        }

        connection.set_deadline(self.config.stall_timeout);
        let fetched = self.fetch(connection, work).await;
        connection.clear_deadline();

        let data = match fetched {
            Ok(data) => data,
            Err(e) => {
                connection.record_failure();
                return Err(e);
            }
        };

        let digest: [u8; 20] = Sha1::digest(&data).into();
        if digest != work.hash {
            connection.record_failure();
            return Err(TorrentError::PieceHashMismatch { index: work.index });
        }

        Ok(PieceResult {
            index: work.index,
            data,
        })
    }

    async fn fetch<S>(
        &self,
        connection: &mut PeerConnection<S>,
        work: &PieceWork,
    ) -> Result<Vec<u8>, TorrentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut progress = PieceProgress::new(work.length);

        while progress.downloaded < work.length {
            if connection.is_choked() {
                tokio::time::sleep(self.config.choke_backoff).await;
            } else {
                while progress.backlog < self.config.max_backlog && progress.requested < work.length
                {
                    let block_size = self
                        .config
                        .max_block_size
                        .min(work.length - progress.requested);
                    connection
                        .send_request(work.index, progress.requested, block_size)
                        .await?;
                    progress.backlog += 1;
                    progress.requested += block_size;
                }
            }

            progress
                .read_message(connection, work.index, self.piece_count)
                .await?;
        }

        tracing::trace!(
            "Piece {} assembled from {} ({} bytes)",
            work.index,
            connection.address(),
            progress.downloaded
        );
        Ok(progress.buf)
    }
}
