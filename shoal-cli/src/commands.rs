//! CLI command implementations

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand};
use shoal_core::config::ShoalConfig;
use shoal_core::torrent::parsing::parse_torrent_file;
use shoal_core::{Result, ShoalError, TorrentClient};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Download the content of a torrent file
    Download {
        /// Path to the .torrent file
        torrent: PathBuf,
        #[command(flatten)]
        options: DownloadOptions,
    },
    /// Print the metadata of a torrent file
    Inspect {
        /// Path to the .torrent file
        torrent: PathBuf,
    },
}

/// Tunables overriding environment and defaults.
#[derive(Args, Debug, Default)]
pub struct DownloadOptions {
    /// Output directory (must exist)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Dial, handshake and bitfield timeout in seconds
    #[arg(long)]
    pub peer_timeout: Option<u64>,
    /// Per-piece stall timeout in seconds
    #[arg(long)]
    pub stall_timeout: Option<u64>,
    /// Maximum unanswered block requests per peer
    #[arg(long)]
    pub max_backlog: Option<u32>,
    /// Block request size in bytes
    #[arg(long)]
    pub block_size: Option<u32>,
    /// Failed attempts before a peer is banned
    #[arg(long)]
    pub max_retries: Option<u32>,
}

impl DownloadOptions {
    /// Applies the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut ShoalConfig) {
        if let Some(output) = &self.output {
            config.storage.output_dir = output.clone();
        }
        if let Some(seconds) = self.peer_timeout {
            config.network.peer_timeout = Duration::from_secs(seconds);
        }
        if let Some(seconds) = self.stall_timeout {
            config.download.stall_timeout = Duration::from_secs(seconds);
        }
        if let Some(backlog) = self.max_backlog {
            config.download.max_backlog = backlog;
        }
        if let Some(block_size) = self.block_size {
            config.download.max_block_size = block_size;
        }
        if let Some(retries) = self.max_retries {
            config.download.max_retries = retries;
        }
    }
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Download { torrent, options } => download(&torrent, &options).await,
        Commands::Inspect { torrent } => inspect(&torrent).await,
    }
}

async fn download(torrent: &Path, options: &DownloadOptions) -> Result<()> {
    require_file(torrent)?;

    let mut config = ShoalConfig::from_env();
    options.apply(&mut config);
    if !config.storage.output_dir.is_dir() {
        return Err(ShoalError::Configuration {
            reason: format!(
                "output directory {} does not exist",
                config.storage.output_dir.display()
            ),
        });
    }

    let client = TorrentClient::new(config)?;
    let report = client.download_file(torrent).await?;

    println!(
        "Downloaded {} ({} pieces, {} bytes from {} peers) in {:.1?}",
        report.path.display(),
        report.pieces,
        report.bytes,
        report.peers,
        report.elapsed
    );
    Ok(())
}

async fn inspect(torrent: &Path) -> Result<()> {
    require_file(torrent)?;
    let metadata = parse_torrent_file(torrent).await?;

    println!("Name:         {}", metadata.name);
    println!("Info hash:    {}", metadata.info_hash);
    println!("Tracker:      {}", metadata.announce_url);
    println!("Total length: {} bytes", metadata.total_length);
    println!(
        "Pieces:       {} x {} bytes",
        metadata.piece_count(),
        metadata.piece_length
    );
    Ok(())
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ShoalError::Configuration {
            reason: format!("torrent file {} does not exist", path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_only_overrides_given_flags() {
        let mut config = ShoalConfig::default();
        let options = DownloadOptions {
            output: Some(PathBuf::from("/data")),
            max_retries: Some(3),
            block_size: Some(8192),
            ..Default::default()
        };
        options.apply(&mut config);

        assert_eq!(config.storage.output_dir, PathBuf::from("/data"));
        assert_eq!(config.download.max_retries, 3);
        assert_eq!(config.download.max_block_size, 8192);
        assert_eq!(config.download.max_backlog, 10);
        assert_eq!(config.network.peer_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_torrent_is_user_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("missing.torrent");

        let error = inspect(&missing).await.unwrap_err();
        assert!(error.is_user_error());

        let error = download(&missing, &DownloadOptions::default())
            .await
            .unwrap_err();
        assert!(error.is_user_error());
    }

    #[tokio::test]
    async fn test_missing_output_dir_is_user_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let torrent = dir.path().join("file.torrent");
        std::fs::write(&torrent, b"d8:announce0:e").unwrap();

        let options = DownloadOptions {
            output: Some(dir.path().join("nowhere")),
            ..Default::default()
        };
        let error = download(&torrent, &options).await.unwrap_err();
        assert!(matches!(error, ShoalError::Configuration { reason } if reason.contains("nowhere")));
    }
}
