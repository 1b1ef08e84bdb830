//! Swarm behavior when peers misbehave

use std::sync::Arc;
use std::time::Duration;

use shoal_core::config::ShoalConfig;
use shoal_core::storage::MemorySink;
use shoal_core::torrent::{PeerId, SwarmCoordinator, TorrentError};
use shoal_sim::{PeerBehavior, SimulatedPeer, TorrentFixture};

fn fixture(seed: u64) -> Arc<TorrentFixture> {
    Arc::new(TorrentFixture::generate(seed, 3 * 16384, 16384, "faults.bin", "http://t/announce").unwrap())
}

fn config(max_retries: u32) -> ShoalConfig {
    let mut config = ShoalConfig::for_testing();
    config.download.max_retries = max_retries;
    config.download.stall_timeout = Duration::from_millis(300);
    config
}

async fn download(
    fixture: &TorrentFixture,
    config: ShoalConfig,
    peers: &[&SimulatedPeer],
) -> (Result<u32, TorrentError>, MemorySink) {
    let addresses: Vec<_> = peers.iter().map(|peer| peer.address()).collect();
    let mut sink = MemorySink::new(fixture.metadata.total_length);
    let coordinator = SwarmCoordinator::new(config, fixture.metadata.clone(), PeerId::generate());
    let result = coordinator
        .download(&addresses, &mut sink)
        .await
        .map(|summary| summary.pieces);
    (result, sink)
}

#[tokio::test]
async fn test_corrupt_peer_never_reaches_the_sink() {
    let fixture = fixture(21);
    let corrupt = SimulatedPeer::spawn(Arc::clone(&fixture), PeerBehavior::seeding().corrupting([0, 1, 2]))
        .await
        .unwrap();
    let honest = SimulatedPeer::spawn(Arc::clone(&fixture), PeerBehavior::seeding().with_pieces([0, 1, 2]))
        .await
        .unwrap();

    let (result, sink) = download(&fixture, config(3), &[&corrupt, &honest]).await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(sink.data(), fixture.content.as_slice());
    assert_eq!(sink.write_count(), 3);
    // Failed attempts reuse the connection instead of redialing.
    assert_eq!(corrupt.stats().connections, 1);
}

#[tokio::test]
async fn test_stalled_peer_is_banned_and_work_moves_on() {
    let fixture = fixture(22);
    let stalled = SimulatedPeer::spawn(Arc::clone(&fixture), PeerBehavior::seeding().stalling_after(1))
        .await
        .unwrap();
    let honest = SimulatedPeer::spawn(Arc::clone(&fixture), PeerBehavior::seeding())
        .await
        .unwrap();

    let (result, sink) = download(&fixture, config(2), &[&stalled, &honest]).await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(sink.data(), fixture.content.as_slice());
    assert!(stalled.stats().blocks_served <= 1);
}

#[tokio::test]
async fn test_peer_corrupting_one_piece_is_banned() {
    let fixture = fixture(23);
    let peer = SimulatedPeer::spawn(Arc::clone(&fixture), PeerBehavior::seeding().corrupting([1]))
        .await
        .unwrap();

    let (result, sink) = download(&fixture, config(2), &[&peer]).await;

    // Pieces 0 and 2 arrive; piece 1 fails twice and the peer is banned.
    assert!(matches!(result, Err(TorrentError::SwarmExhausted { remaining: 1 })));
    assert_eq!(sink.writes_at(16384), 0);
    assert_eq!(sink.write_count(), 2);
    assert_eq!(peer.stats().connections, 1);
}

#[tokio::test]
async fn test_missing_piece_everywhere_exhausts_the_swarm() {
    let fixture = fixture(24);
    let partial = SimulatedPeer::spawn(Arc::clone(&fixture), PeerBehavior::seeding().with_pieces([0]))
        .await
        .unwrap();

    let (result, sink) = download(&fixture, config(4), &[&partial]).await;

    assert!(matches!(result, Err(TorrentError::SwarmExhausted { remaining: 2 })));
    assert_eq!(sink.writes_at(0), 1);
    assert_eq!(&sink.data()[..16384], fixture.piece(shoal_core::torrent::PieceIndex::new(0)));
    // Unadvertised pieces are never requested.
    assert_eq!(partial.stats().requests, 1);
}

#[tokio::test]
async fn test_handshake_mismatch_peer_is_skipped() {
    let fixture = fixture(25);
    let impostor = SimulatedPeer::spawn(Arc::clone(&fixture), PeerBehavior::seeding().with_wrong_info_hash())
        .await
        .unwrap();

    let (result, _) = download(&fixture, config(2), &[&impostor]).await;
    assert!(matches!(result, Err(TorrentError::SwarmExhausted { remaining: 3 })));
    assert_eq!(impostor.stats().requests, 0);

    let honest = SimulatedPeer::spawn(Arc::clone(&fixture), PeerBehavior::seeding())
        .await
        .unwrap();
    let (result, sink) = download(&fixture, config(2), &[&impostor, &honest]).await;
    assert_eq!(result.unwrap(), 3);
    assert_eq!(sink.data(), fixture.content.as_slice());
}

#[tokio::test]
async fn test_unreachable_peer_alongside_seeder() {
    let fixture = fixture(26);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);
    let honest = SimulatedPeer::spawn(Arc::clone(&fixture), PeerBehavior::seeding())
        .await
        .unwrap();

    let mut sink = MemorySink::new(fixture.metadata.total_length);
    let coordinator =
        SwarmCoordinator::new(config(2), fixture.metadata.clone(), PeerId::generate());
    coordinator
        .download(&[dead, honest.address()], &mut sink)
        .await
        .unwrap();

    assert_eq!(sink.data(), fixture.content.as_slice());
}
