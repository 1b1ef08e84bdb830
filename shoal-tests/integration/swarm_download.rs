//! Swarm downloads from healthy simulated peers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sha1::{Digest, Sha1};
use shoal_core::config::ShoalConfig;
use shoal_core::storage::MemorySink;
use shoal_core::torrent::{PeerId, SwarmCoordinator};
use shoal_sim::{PeerBehavior, SimulatedPeer, TorrentFixture};

const PIECE_LENGTH: u32 = 32768;

fn coordinator(fixture: &TorrentFixture, config: ShoalConfig) -> SwarmCoordinator {
    SwarmCoordinator::new(config, fixture.metadata.clone(), PeerId::generate())
}

#[tokio::test]
async fn test_two_partial_peers_with_choke_toggling() {
    // Three pieces, the last one short; 16 KiB blocks give two blocks each.
    let total = 2 * PIECE_LENGTH as usize + 20_000;
    let fixture = Arc::new(
        TorrentFixture::generate(11, total, PIECE_LENGTH, "two-peers.bin", "http://t/announce")
            .unwrap(),
    );

    let first = SimulatedPeer::spawn(
        Arc::clone(&fixture),
        PeerBehavior::seeding()
            .with_pieces([0, 1])
            .choking_every(1, Duration::from_millis(20)),
    )
    .await
    .unwrap();
    let second = SimulatedPeer::spawn(
        Arc::clone(&fixture),
        PeerBehavior::seeding()
            .with_pieces([1, 2])
            .choking_every(2, Duration::from_millis(20)),
    )
    .await
    .unwrap();

    let peers = [first.address(), second.address()];
    let mut sink = MemorySink::new(fixture.metadata.total_length);
    let summary = coordinator(&fixture, ShoalConfig::for_testing())
        .download(&peers, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.pieces, 3);
    assert_eq!(summary.bytes, total as u64);

    let length = u64::from(PIECE_LENGTH);
    for offset in [0, length, 2 * length] {
        assert_eq!(sink.writes_at(offset), 1, "offset {offset}");
    }
    assert_eq!(sink.write_count(), 3);

    let written: [u8; 20] = Sha1::digest(sink.data()).into();
    let expected: [u8; 20] = Sha1::digest(&fixture.content).into();
    assert_eq!(written, expected);

    // Piece 0 only exists at the first peer, piece 2 only at the second.
    let first_stats = first.stats();
    let second_stats = second.stats();
    assert!(first_stats.chokes_sent >= 1);
    assert!(second_stats.chokes_sent >= 1);
    assert_eq!(first_stats.connections, 1);
    assert_eq!(second_stats.connections, 1);
    assert_eq!(first_stats.interested_received, 1);
    assert_eq!(second_stats.interested_received, 1);
}

#[tokio::test]
async fn test_every_piece_written_exactly_once() {
    let total = 40 * 16384 - 100;
    let fixture = Arc::new(
        TorrentFixture::generate(5, total, 16384, "many.bin", "http://t/announce").unwrap(),
    );

    let mut seeders = Vec::new();
    for _ in 0..4 {
        seeders.push(
            SimulatedPeer::spawn(Arc::clone(&fixture), PeerBehavior::seeding())
                .await
                .unwrap(),
        );
    }
    let peers: Vec<SocketAddr> = seeders.iter().map(SimulatedPeer::address).collect();

    let mut sink = MemorySink::new(fixture.metadata.total_length);
    let summary = coordinator(&fixture, ShoalConfig::for_testing())
        .download(&peers, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.pieces, 40);
    assert_eq!(sink.write_count(), 40);
    for index in 0..40u64 {
        assert_eq!(sink.writes_at(index * 16384), 1, "piece {index}");
    }
    assert_eq!(sink.data(), fixture.content.as_slice());

    let served: u32 = seeders.iter().map(|peer| peer.stats().blocks_served).sum();
    assert!(served >= 40);
}

#[tokio::test]
async fn test_small_blocks_and_backlog_of_one() {
    let fixture = Arc::new(
        TorrentFixture::generate(9, 10_000, 4096, "small.bin", "http://t/announce").unwrap(),
    );
    let peer = SimulatedPeer::spawn(Arc::clone(&fixture), PeerBehavior::seeding())
        .await
        .unwrap();

    let mut config = ShoalConfig::for_testing();
    config.download.max_block_size = 1000;
    config.download.max_backlog = 1;

    let mut sink = MemorySink::new(fixture.metadata.total_length);
    coordinator(&fixture, config)
        .download(&[peer.address()], &mut sink)
        .await
        .unwrap();

    assert_eq!(sink.data(), fixture.content.as_slice());
    // 4096 + 4096 + 1808 bytes in blocks of at most 1000
    assert_eq!(peer.stats().requests, 5 + 5 + 2);
}
