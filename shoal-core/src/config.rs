//! Centralized configuration for Shoal.
//!
//! Every tunable of the download engine lives here. A `ShoalConfig` is built
//! once at startup and handed to the components that need it.

use std::path::PathBuf;
use std::time::Duration;

use crate::ShoalError;

/// Largest block a peer is expected to serve in one `piece` message.
pub const MAX_BLOCK_SIZE_LIMIT: u32 = 128 * 1024;

/// Central configuration for all Shoal components.
#[derive(Debug, Clone, Default)]
pub struct ShoalConfig {
    pub download: DownloadConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
}

/// Piece download state machine and swarm tunables.
///
/// These trade memory and latency against throughput; none of them are part
/// of the wire protocol.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Deadline covering one whole piece attempt
    pub stall_timeout: Duration,
    /// Maximum requested but unanswered blocks per attempt
    pub max_backlog: u32,
    /// Size of each block request
    pub max_block_size: u32,
    /// Failed attempts a peer may accumulate before it is banned
    pub max_retries: u32,
    /// Pause before reading again while choked
    pub choke_backoff: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(30),
            max_backlog: 10,
            max_block_size: 16384, // 16 KiB
            max_retries: 10,
            choke_backoff: Duration::from_secs(1),
        }
    }
}

/// Peer and tracker networking configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bound on dial, handshake and bitfield exchange, each
    pub peer_timeout: Duration,
    /// HTTP request timeout for tracker communication
    pub tracker_timeout: Duration,
    /// Port reported to the tracker
    pub listen_port: u16,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            peer_timeout: Duration::from_secs(5),
            tracker_timeout: Duration::from_secs(30),
            listen_port: 6881,
            user_agent: "shoal/0.1.0",
        }
    }
}

/// Destination configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory the downloaded file is created in
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
        }
    }
}

impl ShoalConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(seconds) = env_parse::<u64>("SHOAL_STALL_TIMEOUT") {
            config.download.stall_timeout = Duration::from_secs(seconds);
        }
        if let Some(backlog) = env_parse::<u32>("SHOAL_MAX_BACKLOG") {
            config.download.max_backlog = backlog;
        }
        if let Some(block_size) = env_parse::<u32>("SHOAL_BLOCK_SIZE") {
            config.download.max_block_size = block_size;
        }
        if let Some(retries) = env_parse::<u32>("SHOAL_MAX_RETRIES") {
            config.download.max_retries = retries;
        }

        if let Some(seconds) = env_parse::<u64>("SHOAL_PEER_TIMEOUT") {
            config.network.peer_timeout = Duration::from_secs(seconds);
        }
        if let Some(seconds) = env_parse::<u64>("SHOAL_TRACKER_TIMEOUT") {
            config.network.tracker_timeout = Duration::from_secs(seconds);
        }

        if let Ok(dir) = std::env::var("SHOAL_OUTPUT_DIR") {
            config.storage.output_dir = PathBuf::from(dir);
        }

        config
    }

    /// Creates a configuration with short timeouts for loopback tests.
    pub fn for_testing() -> Self {
        Self {
            download: DownloadConfig {
                stall_timeout: Duration::from_secs(2),
                choke_backoff: Duration::from_millis(10),
                max_retries: 50,
                ..Default::default()
            },
            network: NetworkConfig {
                peer_timeout: Duration::from_secs(1),
                tracker_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            storage: StorageConfig::default(),
        }
    }

    /// Rejects values the download engine cannot operate with.
    ///
    /// # Errors
    /// - `ShoalError::Configuration` - Zero backlog, block size or retries,
    ///   or a block size above `MAX_BLOCK_SIZE_LIMIT`
    pub fn validate(&self) -> Result<(), ShoalError> {
        let download = &self.download;
        if download.max_backlog == 0 {
            return Err(configuration("max backlog must be at least 1"));
        }
        if download.max_block_size == 0 {
            return Err(configuration("block size must be at least 1 byte"));
        }
        if download.max_block_size > MAX_BLOCK_SIZE_LIMIT {
            return Err(configuration(format!(
                "block size {} exceeds limit of {MAX_BLOCK_SIZE_LIMIT}",
                download.max_block_size
            )));
        }
        if download.max_retries == 0 {
            return Err(configuration("max retries must be at least 1"));
        }
        if download.stall_timeout.is_zero() || self.network.peer_timeout.is_zero() {
            return Err(configuration("timeouts must be non-zero"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

fn configuration(reason: impl Into<String>) -> ShoalError {
    ShoalError::Configuration {
        reason: reason.into(),
    }
}
