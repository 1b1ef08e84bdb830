//! Shoal CLI - Command-line interface
//!
//! Downloads single-file torrents from their swarm.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use shoal_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "shoal")]
#[command(about = "A BitTorrent swarm downloader")]
struct Cli {
    /// Console log level (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Directory for a full trace log of this run
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())?;

    if let Err(e) = commands::handle_command(cli.command).await {
        tracing::error!("{}", e);
        anyhow::bail!(e.user_message());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download_with_overrides() {
        let cli = Cli::try_parse_from([
            "shoal",
            "--log-level",
            "debug",
            "download",
            "file.torrent",
            "-o",
            "/tmp",
            "--max-backlog",
            "5",
            "--stall-timeout",
            "12",
        ])
        .unwrap();

        assert_eq!(cli.log_level, CliLogLevel::Debug);
        let commands::Commands::Download { torrent, options } = cli.command else {
            panic!("expected download command");
        };
        assert_eq!(torrent, PathBuf::from("file.torrent"));
        assert_eq!(options.output, Some(PathBuf::from("/tmp")));
        assert_eq!(options.max_backlog, Some(5));
        assert_eq!(options.stall_timeout, Some(12));
        assert_eq!(options.max_retries, None);
    }

    #[test]
    fn test_parse_inspect_and_reject_unknown_level() {
        let cli = Cli::try_parse_from(["shoal", "inspect", "file.torrent"]).unwrap();
        assert_eq!(cli.log_level, CliLogLevel::Info);
        assert!(matches!(cli.command, commands::Commands::Inspect { .. }));

        assert!(Cli::try_parse_from(["shoal", "--log-level", "loud", "inspect", "x"]).is_err());
    }
}
