//! End-to-end tests for Shoal
//!
//! A torrent file on disk goes in, a verified file in the output directory
//! comes out, with a simulated tracker and simulated peers in between.

mod client_download;
