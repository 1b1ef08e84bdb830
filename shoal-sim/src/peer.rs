//! Seeding peer served over loopback TCP
//!
//! Answers the wire protocol the way a well-behaved remote client would,
//! unless told otherwise by its `PeerBehavior`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shoal_core::torrent::{
    Bitfield, HandshakeCodec, InfoHash, Message, MessageCodec, MessageId, PeerHandshake, PeerId,
    PieceIndex, TorrentError,
};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::fixtures::TorrentFixture;

/// Faults and limits applied by a simulated peer.
#[derive(Debug, Clone, Default)]
pub struct PeerBehavior {
    /// Pieces advertised and served; `None` means all of them
    pub pieces: Option<Vec<u32>>,
    /// Send choke, pause, then unchoke after every N blocks served
    pub choke_every: Option<u32>,
    pub choke_pause: Duration,
    /// Pieces whose blocks are served with every byte inverted
    pub corrupt_pieces: Vec<u32>,
    /// Reply to handshakes with a different info hash
    pub wrong_info_hash: bool,
    /// Stop answering requests after N blocks on a connection
    pub stall_after: Option<u32>,
    /// Send unchoke before the bitfield, violating setup order
    pub unchoke_first: bool,
    /// Delay before each served block
    pub block_delay: Duration,
}

impl PeerBehavior {
    pub fn seeding() -> Self {
        Self::default()
    }

    pub fn with_pieces(mut self, pieces: impl IntoIterator<Item = u32>) -> Self {
        self.pieces = Some(pieces.into_iter().collect());
        self
    }

    pub fn choking_every(mut self, blocks: u32, pause: Duration) -> Self {
        self.choke_every = Some(blocks);
        self.choke_pause = pause;
        self
    }

    pub fn corrupting(mut self, pieces: impl IntoIterator<Item = u32>) -> Self {
        self.corrupt_pieces = pieces.into_iter().collect();
        self
    }

    pub fn with_wrong_info_hash(mut self) -> Self {
        self.wrong_info_hash = true;
        self
    }

    pub fn stalling_after(mut self, blocks: u32) -> Self {
        self.stall_after = Some(blocks);
        self
    }

    pub fn unchoking_first(mut self) -> Self {
        self.unchoke_first = true;
        self
    }

    fn has_piece(&self, index: u32) -> bool {
        self.pieces
            .as_ref()
            .is_none_or(|pieces| pieces.contains(&index))
    }
}

/// Counters observed by a simulated peer across all its connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub connections: u32,
    pub requests: u32,
    pub blocks_served: u32,
    pub chokes_sent: u32,
    pub interested_received: u32,
    /// Piece indices announced to us through `have`
    pub haves_received: Vec<u32>,
}

/// A seeding peer listening on an ephemeral loopback port.
///
/// The listener task is aborted when the value is dropped.
pub struct SimulatedPeer {
    address: SocketAddr,
    stats: Arc<Mutex<PeerStats>>,
    task: JoinHandle<()>,
}

impl SimulatedPeer {
    /// Binds to 127.0.0.1 and starts accepting connections.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - If the listener could not be bound
    pub async fn spawn(
        fixture: Arc<TorrentFixture>,
        behavior: PeerBehavior,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let stats = Arc::new(Mutex::new(PeerStats::default()));
        let behavior = Arc::new(behavior);

        let task_stats = Arc::clone(&stats);
        let task = tokio::spawn(async move {
            loop {
                let (stream, remote) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::error!("Simulated peer {} failed to accept: {}", address, e);
                        break;
                    }
                };
                task_stats.lock().connections += 1;

                let session = PeerSession {
                    fixture: Arc::clone(&fixture),
                    behavior: Arc::clone(&behavior),
                    stats: Arc::clone(&task_stats),
                };
                tokio::spawn(async move {
                    if let Err(e) = session.run(stream).await {
                        tracing::trace!("Simulated peer session with {} ended: {}", remote, e);
                    }
                });
            }
        });

        tracing::debug!("Simulated peer listening on {}", address);
        Ok(Self {
            address,
            stats,
            task,
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> PeerStats {
        self.stats.lock().clone()
    }
}

impl Drop for SimulatedPeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct PeerSession {
    fixture: Arc<TorrentFixture>,
    behavior: Arc<PeerBehavior>,
    stats: Arc<Mutex<PeerStats>>,
}

impl PeerSession {
    async fn run(&self, mut stream: TcpStream) -> Result<(), TorrentError> {
        let metadata = &self.fixture.metadata;

        let theirs = HandshakeCodec::read_handshake(&mut stream).await?;
        if theirs.info_hash != metadata.info_hash {
            tracing::debug!("Simulated peer rejecting unknown torrent {}", theirs.info_hash);
            return Ok(());
        }

        let announced_hash = if self.behavior.wrong_info_hash {
            InfoHash::new([0xee; 20])
        } else {
            metadata.info_hash
        };
        let reply = PeerHandshake::new(announced_hash, PeerId::new(*b"-SM0001-simulatedpee"));
        stream
            .write_all(&HandshakeCodec::serialize_handshake(&reply))
            .await?;

        if self.behavior.unchoke_first {
            send(&mut stream, &Message::empty(MessageId::Unchoke)).await?;
        }

        let advertised = (0..metadata.piece_count()).filter(|&i| self.behavior.has_piece(i));
        let bitfield = Bitfield::from_pieces(metadata.piece_count() as usize, advertised);
        send(
            &mut stream,
            &Message::new(MessageId::Bitfield, bitfield.as_bytes().to_vec()),
        )
        .await?;
        send(&mut stream, &Message::empty(MessageId::Unchoke)).await?;

        let mut served = 0u32;
        loop {
            let Some(message) = MessageCodec::read_message(&mut stream).await? else {
                continue;
            };

            match message.id {
                MessageId::Request => {
                    self.stats.lock().requests += 1;
                    if self.behavior.stall_after.is_some_and(|limit| served >= limit) {
                        continue;
                    }

                    let (index, begin, length) = MessageCodec::parse_request(&message)?;
                    let Some(block) = self.block(index, begin, length) else {
                        tracing::debug!(
                            "Simulated peer ignoring request for piece {} [{}+{}]",
                            index,
                            begin,
                            length
                        );
                        continue;
                    };

                    if !self.behavior.block_delay.is_zero() {
                        tokio::time::sleep(self.behavior.block_delay).await;
                    }
                    send(&mut stream, &Message::piece(index, begin, &block)).await?;
                    served += 1;
                    self.stats.lock().blocks_served += 1;

                    if let Some(every) = self.behavior.choke_every
                        && every > 0
                        && served.is_multiple_of(every)
                    {
                        self.toggle_choke(&mut stream).await?;
                    }
                }
                MessageId::Have => {
                    let index = MessageCodec::parse_have(&message)?;
                    self.stats.lock().haves_received.push(index.as_u32());
                }
                MessageId::Interested => self.stats.lock().interested_received += 1,
                other => tracing::trace!("Simulated peer ignoring {:?}", other),
            }
        }
    }

    /// Chokes, pauses, then unchokes; queued requests are served afterwards.
    async fn toggle_choke(&self, stream: &mut TcpStream) -> Result<(), TorrentError> {
        send(stream, &Message::empty(MessageId::Choke)).await?;
        self.stats.lock().chokes_sent += 1;
        tokio::time::sleep(self.behavior.choke_pause).await;
        send(stream, &Message::empty(MessageId::Unchoke)).await
    }

    fn block(&self, index: PieceIndex, begin: u32, length: u32) -> Option<Vec<u8>> {
        if !self.behavior.has_piece(index.as_u32())
            || index.as_u32() >= self.fixture.metadata.piece_count()
        {
            return None;
        }

        let piece = self.fixture.piece(index);
        let start = begin as usize;
        let end = start.checked_add(length as usize)?;
        let mut block = piece.get(start..end)?.to_vec();
        if self.behavior.corrupt_pieces.contains(&index.as_u32()) {
            block.iter_mut().for_each(|byte| *byte = !*byte);
        }
        Some(block)
    }
}

async fn send(stream: &mut TcpStream, message: &Message) -> Result<(), TorrentError> {
    stream
        .write_all(&MessageCodec::serialize_message(Some(message)))
        .await?;
    Ok(())
}
