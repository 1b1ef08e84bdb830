//! Integration tests for Shoal
//!
//! These tests drive the swarm coordinator against simulated peers on
//! loopback sockets and check what ends up in the sink.

#[path = "integration/swarm_download.rs"]
mod swarm_download;

#[path = "integration/peer_faults.rs"]
mod peer_faults;
