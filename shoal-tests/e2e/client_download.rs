//! Full client pipeline: torrent file, tracker announce, swarm, output file

use std::sync::Arc;
use std::time::Duration;

use sha1::{Digest, Sha1};
use shoal_core::config::ShoalConfig;
use shoal_core::{ShoalError, TorrentClient, TorrentError};
use shoal_sim::{PeerBehavior, SimulatedPeer, SimulatedTracker, TorrentFixture};

const SEED: u64 = 42;
const TOTAL: usize = 5 * 32768 + 1234;
const PIECE_LENGTH: u32 = 32768;

fn client(output_dir: &std::path::Path) -> TorrentClient {
    let mut config = ShoalConfig::for_testing();
    config.storage.output_dir = output_dir.to_path_buf();
    TorrentClient::new(config).unwrap()
}

#[tokio::test]
async fn test_download_torrent_file_through_tracker() {
    // Peers need the content before the tracker URL is known; the info
    // dictionary does not cover the announce URL, so both fixtures share
    // an info hash.
    let seeded = Arc::new(
        TorrentFixture::generate(SEED, TOTAL, PIECE_LENGTH, "movie.bin", "http://unused/announce")
            .unwrap(),
    );
    let first = SimulatedPeer::spawn(
        Arc::clone(&seeded),
        PeerBehavior::seeding().with_pieces([0, 1, 2, 3]),
    )
    .await
    .unwrap();
    let second = SimulatedPeer::spawn(
        Arc::clone(&seeded),
        PeerBehavior::seeding()
            .with_pieces([2, 3, 4, 5])
            .choking_every(3, Duration::from_millis(10)),
    )
    .await
    .unwrap();

    let tracker = SimulatedTracker::spawn(vec![first.address(), second.address()])
        .await
        .unwrap();
    let fixture =
        TorrentFixture::generate(SEED, TOTAL, PIECE_LENGTH, "movie.bin", &tracker.announce_url())
            .unwrap();
    assert_eq!(fixture.metadata.info_hash, seeded.metadata.info_hash);

    let workdir = tempfile::TempDir::new().unwrap();
    let torrent_path = fixture.write_torrent_file(workdir.path()).unwrap();
    let output = tempfile::TempDir::new().unwrap();

    let client = client(output.path());
    let report = client.download_file(&torrent_path).await.unwrap();

    assert_eq!(report.path, output.path().join("movie.bin"));
    assert_eq!(report.info_hash, fixture.metadata.info_hash);
    assert_eq!(report.pieces, 6);
    assert_eq!(report.bytes, TOTAL as u64);
    assert_eq!(report.peers, 2);

    let written = std::fs::read(&report.path).unwrap();
    assert_eq!(written.len(), TOTAL);
    let written: [u8; 20] = Sha1::digest(&written).into();
    let expected: [u8; 20] = Sha1::digest(&fixture.content).into();
    assert_eq!(written, expected);

    let announces = tracker.announces();
    assert_eq!(announces.len(), 1);
    assert_eq!(announces[0].info_hash, fixture.metadata.info_hash.as_bytes().to_vec());
    assert_eq!(announces[0].peer_id, client.peer_id().as_bytes().to_vec());
    assert_eq!(announces[0].left, Some(TOTAL as u64));
    assert_eq!(announces[0].port, Some(6881));
    assert!(announces[0].compact);
}

#[tokio::test]
async fn test_tracker_failure_reason_is_reported() {
    let tracker = SimulatedTracker::failing("torrent not registered").await.unwrap();
    let fixture =
        TorrentFixture::generate(SEED, 1000, 256, "rejected.bin", &tracker.announce_url()).unwrap();
    let output = tempfile::TempDir::new().unwrap();

    let result = client(output.path()).download(fixture.metadata).await;

    assert!(matches!(
        result,
        Err(ShoalError::Torrent(TorrentError::TrackerRejected { ref reason }))
            if reason == "torrent not registered"
    ));
    assert!(!output.path().join("rejected.bin").exists());
}

#[tokio::test]
async fn test_empty_swarm_is_reported() {
    let tracker = SimulatedTracker::spawn(Vec::new()).await.unwrap();
    let fixture =
        TorrentFixture::generate(SEED, 1000, 256, "lonely.bin", &tracker.announce_url()).unwrap();
    let output = tempfile::TempDir::new().unwrap();

    let error = client(output.path())
        .download(fixture.metadata)
        .await
        .unwrap_err();

    assert!(matches!(error, ShoalError::Torrent(TorrentError::NoPeersAvailable)));
    assert_eq!(error.user_message(), "No peers available for download");
    assert_eq!(tracker.announces().len(), 1);
}

#[tokio::test]
async fn test_unreachable_tracker() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let url = format!("http://{address}/announce");
    let fixture = TorrentFixture::generate(SEED, 1000, 256, "offline.bin", &url).unwrap();
    let output = tempfile::TempDir::new().unwrap();

    let result = client(output.path()).download(fixture.metadata).await;
    assert!(matches!(
        result,
        Err(ShoalError::Torrent(TorrentError::TrackerConnectionFailed { .. }))
    ));
}
