//! Swarm coordinator: distributes piece work across one worker per peer and
//! writes verified pieces to the output sink.
//!
//! Workers and the coordinator share nothing but the work queue and the
//! result channel. Each worker owns its `PeerConnection` outright.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::Instrument;

use super::parsing::TorrentMetadata;
use super::peer_connection::PeerConnection;
use super::piece_download::{PieceDownloader, PieceResult, PieceWork};
use super::protocol::PeerId;
use super::work_queue::WorkQueue;
use super::{InfoHash, TorrentError};
use crate::config::ShoalConfig;
use crate::storage::PieceSink;

/// Terminal outcome of one piece attempt by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Piece verified and published to the coordinator
    Delivered,
    /// Attempt failed; the work item is back in the queue
    Requeued,
}

/// Totals of a completed swarm download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub pieces: u32,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Runs one download of a torrent's content from a list of peers.
pub struct SwarmCoordinator {
    config: ShoalConfig,
    metadata: TorrentMetadata,
    peer_id: PeerId,
}

impl SwarmCoordinator {
    pub fn new(config: ShoalConfig, metadata: TorrentMetadata, peer_id: PeerId) -> Self {
        Self {
            config,
            metadata,
            peer_id,
        }
    }

    /// Downloads every piece from `peers` and writes it into `sink`.
    ///
    /// Returns once each piece has been written exactly once. Peer failures
    /// are handled by the workers and never surface here.
    ///
    /// # Errors
    /// - `TorrentError::Storage` - Sink write failed; the transfer is aborted
    /// - `TorrentError::SwarmExhausted` - Every worker exited with pieces left
    pub async fn download<K>(
        &self,
        peers: &[SocketAddr],
        sink: &mut K,
    ) -> Result<DownloadSummary, TorrentError>
    where
        K: PieceSink + ?Sized,
    {
        let started = Instant::now();
        let work = self.metadata.piece_work();
        let total = work.len();

        let queue = WorkQueue::new(total);
        for item in work {
            queue.push(item).await;
        }

        let (results_tx, mut results) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();

        tracing::info!(
            "Starting download of {} ({} pieces) from {} peers",
            self.metadata.name,
            total,
            peers.len()
        );

        for &address in peers {
            let worker = PeerWorker {
                address,
                peer_id: self.peer_id,
                info_hash: self.metadata.info_hash,
                peer_timeout: self.config.network.peer_timeout,
                downloader: PieceDownloader::new(
                    self.config.download.clone(),
                    self.metadata.piece_count(),
                ),
                queue: queue.clone(),
                results: results_tx.clone(),
                active: Arc::clone(&active),
            };
            workers.spawn(
                worker
                    .run()
                    .instrument(tracing::info_span!("peer", address = %address)),
            );
        }
        drop(results_tx);

        let mut done = 0;
        let mut bytes = 0u64;
        while done < total {
            let Some(piece) = results.recv().await else {
                queue.close();
                workers.shutdown().await;
                let remaining = (total - done) as u32;
                tracing::error!("All peers gave up with {} pieces remaining", remaining);
                return Err(TorrentError::SwarmExhausted { remaining });
            };

            let (begin, _) = self.metadata.piece_bounds(piece.index);
            if let Err(e) = sink.write_at(begin, &piece.data).await {
                queue.close();
                workers.shutdown().await;
                return Err(e.into());
            }

            done += 1;
            bytes += piece.data.len() as u64;
            let percent = done as f64 / total as f64 * 100.0;
            tracing::info!(
                "({:.2}%) Downloaded piece #{} from {} peers, {} remaining",
                percent,
                piece.index,
                active.load(Ordering::Relaxed),
                total - done
            );
        }

        queue.close();
        workers.shutdown().await;

        Ok(DownloadSummary {
            pieces: done as u32,
            bytes,
            elapsed: started.elapsed(),
        })
    }
}

/// Per-peer task pulling work until the queue closes or the peer is banned.
struct PeerWorker {
    address: SocketAddr,
    peer_id: PeerId,
    info_hash: InfoHash,
    peer_timeout: Duration,
    downloader: PieceDownloader,
    queue: WorkQueue,
    results: mpsc::UnboundedSender<PieceResult>,
    active: Arc<AtomicUsize>,
}

impl PeerWorker {
    async fn run(self) {
        let mut connection = match PeerConnection::connect(
            self.address,
            self.peer_id,
            self.info_hash,
            self.peer_timeout,
        )
        .await
        {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!("Could not handshake with {}: {}", self.address, e);
                return;
            }
        };
        tracing::info!("Completed handshake with {}", self.address);

        if let Err(e) = Self::greet(&mut connection).await {
            tracing::warn!("Could not greet {}: {}", self.address, e);
            return;
        }

        self.active.fetch_add(1, Ordering::Relaxed);
        while let Some(work) = self.queue.pop().await {
            if self.attempt(&mut connection, work).await == AttemptOutcome::Requeued {
                if connection.is_banned() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        }
        self.active.fetch_sub(1, Ordering::Relaxed);

        connection.shutdown().await;
    }

    async fn greet(connection: &mut PeerConnection) -> Result<(), TorrentError> {
        connection.send_unchoke().await?;
        connection.send_interested().await
    }

    async fn attempt(&self, connection: &mut PeerConnection, work: PieceWork) -> AttemptOutcome {
        match self.downloader.download(connection, &work).await {
            Ok(piece) => {
                if let Err(e) = connection.send_have(piece.index).await {
                    tracing::debug!("Failed to send have for piece {}: {}", piece.index, e);
                }
                if self.results.send(piece).is_err() {
                    tracing::debug!("Coordinator stopped, dropping piece {}", work.index);
                }
                AttemptOutcome::Delivered
            }
            Err(e) => {
                match &e {
                    TorrentError::PeerBanned { .. } => tracing::warn!("{}", e),
                    TorrentError::PieceUnavailable { .. } => tracing::trace!("{}", e),
                    _ if e.is_timeout() => {
                        tracing::debug!("Piece {} stalled on {}", work.index, self.address)
                    }
                    _ => tracing::debug!("Piece {} failed: {}", work.index, e),
                }
                self.queue.requeue(work).await;
                AttemptOutcome::Requeued
            }
        }
    }
}
