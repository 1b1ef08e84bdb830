//! Connection to one remote peer over the BitTorrent wire protocol
//!
//! The connection is a transport: it dials, handshakes, receives the initial
//! bitfield and then only sends and receives frames. Choke and availability
//! state live here but are changed by the piece download state machine after
//! it inspects each message.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::bitfield::Bitfield;
use super::protocol::{HandshakeCodec, Message, MessageCodec, MessageId, PeerHandshake, PeerId};
use super::{InfoHash, PieceIndex, TorrentError};

/// Connection to a BitTorrent peer.
///
/// Owned by exactly one worker for its whole lifetime; none of its state is
/// shared with other tasks.
pub struct PeerConnection<S = TcpStream> {
    address: SocketAddr,
    stream: S,
    deadline: Option<Instant>,
    choked: bool,
    bitfield: Bitfield,
    retries: u32,
    banned: bool,
}

impl PeerConnection<TcpStream> {
    /// Dials the peer and performs handshake and bitfield exchange.
    ///
    /// `timeout` bounds the dial and then each of the two setup phases
    /// separately.
    ///
    /// # Errors
    /// - `TorrentError::Timeout` - Dial, handshake or bitfield took too long
    /// - `TorrentError::Io` - TCP connection failed or closed early
    /// - `TorrentError::HandshakeMismatch` - Peer serves another torrent
    /// - `TorrentError::ProtocolError` - Malformed handshake or first message
    ///   not a bitfield
    pub async fn connect(
        address: SocketAddr,
        peer_id: PeerId,
        info_hash: InfoHash,
        timeout: Duration,
    ) -> Result<Self, TorrentError> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
            Ok(stream) => stream?,
            Err(_) => return Err(TorrentError::Timeout { phase: "connect" }),
        };

        Self::establish(address, stream, peer_id, info_hash, timeout).await
    }
}

impl<S> PeerConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Runs connection setup over an already open stream.
    ///
    /// # Errors
    /// Same as [`PeerConnection::connect`] minus dialing.
    pub async fn establish(
        address: SocketAddr,
        stream: S,
        peer_id: PeerId,
        info_hash: InfoHash,
        timeout: Duration,
    ) -> Result<Self, TorrentError> {
        let mut connection = Self {
            address,
            stream,
            deadline: None,
            choked: true,
            bitfield: Bitfield::default(),
            retries: 0,
            banned: false,
        };

        connection.set_deadline(timeout);
        let handshake = connection.exchange_handshake(peer_id, info_hash).await;
        connection.clear_deadline();
        let handshake = handshake?;
        tracing::trace!(
            "Handshake with {} accepted, remote peer id {}",
            address,
            String::from_utf8_lossy(handshake.peer_id.as_bytes())
        );

        connection.set_deadline(timeout);
        let bitfield = connection.receive_bitfield().await;
        connection.clear_deadline();
        connection.bitfield = bitfield?;
        tracing::debug!(
            "Peer {} advertises {} pieces",
            address,
            connection.bitfield.count()
        );

        Ok(connection)
    }

    async fn exchange_handshake(
        &mut self,
        peer_id: PeerId,
        info_hash: InfoHash,
    ) -> Result<PeerHandshake, TorrentError> {
        let request = HandshakeCodec::serialize_handshake(&PeerHandshake::new(info_hash, peer_id));
        self.write_bytes(&request, "handshake").await?;

        let stream = &mut self.stream;
        let reply = with_deadline(
            self.deadline,
            "handshake",
            HandshakeCodec::read_handshake(stream),
        )
        .await?;

        if reply.info_hash != info_hash {
            return Err(TorrentError::HandshakeMismatch {
                expected: info_hash,
                received: reply.info_hash,
            });
        }

        Ok(reply)
    }

    async fn receive_bitfield(&mut self) -> Result<Bitfield, TorrentError> {
        let stream = &mut self.stream;
        let message =
            with_deadline(self.deadline, "bitfield", MessageCodec::read_message(stream)).await?;

        match message {
            Some(message) if message.id == MessageId::Bitfield => {
                Ok(Bitfield::from_bytes(message.payload))
            }
            Some(message) => Err(TorrentError::protocol(format!(
                "Expected bitfield as first message, got {:?}",
                message.id
            ))),
            None => Err(TorrentError::protocol(
                "Expected bitfield as first message, got keep-alive",
            )),
        }
    }

    /// Reads the next frame; `None` is a keep-alive.
    ///
    /// Does not touch choke or bitfield state.
    ///
    /// # Errors
    /// - `TorrentError::Timeout` - Current deadline passed
    /// - `TorrentError::Io` - Read failed or connection closed
    /// - `TorrentError::ProtocolError` - Oversized frame
    pub async fn read_next(&mut self) -> Result<Option<Message>, TorrentError> {
        let stream = &mut self.stream;
        with_deadline(self.deadline, "read", MessageCodec::read_message(stream)).await
    }

    /// Writes one complete message.
    ///
    /// # Errors
    /// - `TorrentError::Timeout` - Current deadline passed
    /// - `TorrentError::Io` - Write failed
    pub async fn send_message(&mut self, message: &Message) -> Result<(), TorrentError> {
        let bytes = MessageCodec::serialize_message(Some(message));
        self.write_bytes(&bytes, "write").await
    }

    /// Sends `interested`.
    ///
    /// # Errors
    /// See [`PeerConnection::send_message`].
    pub async fn send_interested(&mut self) -> Result<(), TorrentError> {
        self.send_message(&Message::empty(MessageId::Interested))
            .await
    }

    /// Sends `not interested`.
    ///
    /// # Errors
    /// See [`PeerConnection::send_message`].
    pub async fn send_not_interested(&mut self) -> Result<(), TorrentError> {
        self.send_message(&Message::empty(MessageId::NotInterested))
            .await
    }

    /// Sends `unchoke`.
    ///
    /// # Errors
    /// See [`PeerConnection::send_message`].
    pub async fn send_unchoke(&mut self) -> Result<(), TorrentError> {
        self.send_message(&Message::empty(MessageId::Unchoke)).await
    }

    /// Sends `have` for a verified piece.
    ///
    /// # Errors
    /// See [`PeerConnection::send_message`].
    pub async fn send_have(&mut self, index: PieceIndex) -> Result<(), TorrentError> {
        self.send_message(&Message::have(index)).await
    }

    /// Sends a block request.
    ///
    /// # Errors
    /// See [`PeerConnection::send_message`].
    pub async fn send_request(
        &mut self,
        index: PieceIndex,
        begin: u32,
        length: u32,
    ) -> Result<(), TorrentError> {
        self.send_message(&Message::request(index, begin, length))
            .await
    }

    /// Closes the write half. Errors are irrelevant at this point.
    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    /// Arms a deadline covering every read and write from now on.
    pub fn set_deadline(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    /// Removes the current deadline.
    pub fn clear_deadline(&mut self) {
        self.deadline = None;
    }

    /// Returns the socket address of the peer.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn is_choked(&self) -> bool {
        self.choked
    }

    pub fn set_choked(&mut self, choked: bool) {
        self.choked = choked;
    }

    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    pub fn bitfield_mut(&mut self) -> &mut Bitfield {
        &mut self.bitfield
    }

    /// Number of failed piece attempts on this connection.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn record_failure(&mut self) {
        self.retries += 1;
    }

    pub fn is_banned(&self) -> bool {
        self.banned
    }

    pub fn ban(&mut self) {
        self.banned = true;
    }

    async fn write_bytes(&mut self, bytes: &[u8], phase: &'static str) -> Result<(), TorrentError> {
        let stream = &mut self.stream;
        with_deadline(self.deadline, phase, async move {
            stream.write_all(bytes).await?;
            Ok(())
        })
        .await
    }
}

/// Runs `operation` against the deadline, if one is armed.
async fn with_deadline<T, F>(
    deadline: Option<Instant>,
    phase: &'static str,
    operation: F,
) -> Result<T, TorrentError>
where
    F: Future<Output = Result<T, TorrentError>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, operation)
            .await
            .map_err(|_| TorrentError::Timeout { phase })?,
        None => operation.await,
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use tokio_test::io::Builder;

    use super::*;

    fn test_address() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 6881)
    }

    fn handshake_bytes(info_hash: InfoHash, peer_id: PeerId) -> Vec<u8> {
        HandshakeCodec::serialize_handshake(&PeerHandshake::new(info_hash, peer_id))
    }

    fn frame(message: &Message) -> Vec<u8> {
        MessageCodec::serialize_message(Some(message))
    }

    #[tokio::test]
    async fn test_establish_reads_handshake_and_bitfield() {
        let info_hash = InfoHash::new([1u8; 20]);
        let local_id = PeerId::new([2u8; 20]);
        let remote_id = PeerId::new([3u8; 20]);

        let stream = Builder::new()
            .write(&handshake_bytes(info_hash, local_id))
            .read(&handshake_bytes(info_hash, remote_id))
            .read(&frame(&Message::new(MessageId::Bitfield, vec![0b1010_0000])))
            .build();

        let connection = PeerConnection::establish(
            test_address(),
            stream,
            local_id,
            info_hash,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert!(connection.is_choked());
        assert!(connection.bitfield().has_piece(0));
        assert!(!connection.bitfield().has_piece(1));
        assert!(connection.bitfield().has_piece(2));
        assert_eq!(connection.retries(), 0);
        assert!(!connection.is_banned());
    }

    #[tokio::test]
    async fn test_establish_rejects_foreign_info_hash() {
        let info_hash = InfoHash::new([1u8; 20]);
        let local_id = PeerId::new([2u8; 20]);

        let stream = Builder::new()
            .write(&handshake_bytes(info_hash, local_id))
            .read(&handshake_bytes(InfoHash::new([9u8; 20]), PeerId::new([3u8; 20])))
            .build();

        let result = PeerConnection::establish(
            test_address(),
            stream,
            local_id,
            info_hash,
            Duration::from_secs(1),
        )
        .await;

        assert!(matches!(
            result,
            Err(TorrentError::HandshakeMismatch { received, .. }) if received == InfoHash::new([9u8; 20])
        ));
    }

    #[tokio::test]
    async fn test_establish_requires_bitfield_first() {
        let info_hash = InfoHash::new([1u8; 20]);
        let local_id = PeerId::new([2u8; 20]);

        let stream = Builder::new()
            .write(&handshake_bytes(info_hash, local_id))
            .read(&handshake_bytes(info_hash, PeerId::new([3u8; 20])))
            .read(&frame(&Message::empty(MessageId::Unchoke)))
            .build();

        let result = PeerConnection::establish(
            test_address(),
            stream,
            local_id,
            info_hash,
            Duration::from_secs(1),
        )
        .await;

        assert!(matches!(result, Err(TorrentError::ProtocolError { .. })));
    }

    #[tokio::test]
    async fn test_establish_times_out_on_silent_peer() {
        let (local, _remote) = tokio::io::duplex(1024);

        let result = PeerConnection::establish(
            test_address(),
            local,
            PeerId::generate(),
            InfoHash::new([1u8; 20]),
            Duration::from_millis(50),
        )
        .await;

        assert!(matches!(
            result,
            Err(TorrentError::Timeout { phase: "handshake" })
        ));
    }

    #[tokio::test]
    async fn test_closed_peer_is_io_error() {
        let (local, remote) = tokio::io::duplex(1024);
        drop(remote);

        let result = PeerConnection::establish(
            test_address(),
            local,
            PeerId::generate(),
            InfoHash::new([1u8; 20]),
            Duration::from_secs(1),
        )
        .await;

        assert!(matches!(result, Err(TorrentError::Io(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let result = PeerConnection::connect(
            address,
            PeerId::generate(),
            InfoHash::new([1u8; 20]),
            Duration::from_secs(1),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_send_helpers_write_expected_frames() {
        let info_hash = InfoHash::new([1u8; 20]);
        let local_id = PeerId::new([2u8; 20]);

        let stream = Builder::new()
            .write(&handshake_bytes(info_hash, local_id))
            .read(&handshake_bytes(info_hash, PeerId::new([3u8; 20])))
            .read(&frame(&Message::new(MessageId::Bitfield, vec![0xff])))
            .write(&[0, 0, 0, 1, 1])
            .write(&[0, 0, 0, 1, 2])
            .write(&[0, 0, 0, 1, 3])
            .write(&[0, 0, 0, 5, 4, 0, 0, 0, 7])
            .write(&[0, 0, 0, 13, 6, 0, 0, 0, 7, 0, 0, 0, 0, 0, 0, 0x40, 0])
            .read(&[0, 0, 0, 0])
            .build();

        let mut connection = PeerConnection::establish(
            test_address(),
            stream,
            local_id,
            info_hash,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        connection.send_unchoke().await.unwrap();
        connection.send_interested().await.unwrap();
        connection.send_not_interested().await.unwrap();
        connection.send_have(PieceIndex::new(7)).await.unwrap();
        connection
            .send_request(PieceIndex::new(7), 0, 16384)
            .await
            .unwrap();

        assert_eq!(connection.read_next().await.unwrap(), None);
    }
}
