//! Shoal Simulation - loopback network actors for exercising the downloader.
//!
//! Everything here runs on real sockets bound to 127.0.0.1 so the production
//! connection, tracker and coordinator code paths are used unchanged:
//!
//! - [`SimulatedPeer`]: a seeding peer speaking the wire protocol, with
//!   injectable faults (partial bitfields, choke toggling, corrupt blocks,
//!   wrong info hash, stalls)
//! - [`SimulatedTracker`]: an HTTP announce endpoint returning a fixed peer list
//! - [`TorrentFixture`]: deterministic content plus its bencoded metainfo

pub mod fixtures;
pub mod peer;
pub mod tracker;

pub use fixtures::{TorrentFixture, encode_torrent};
pub use peer::{PeerBehavior, PeerStats, SimulatedPeer};
pub use tracker::{AnnounceRecord, SimulatedTracker};
