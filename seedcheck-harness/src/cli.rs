//! Command-line arguments for the seedcheck binary

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use seedcheck_core::StorageMode;
use seedcheck_core::tracing_setup::CliLogLevel;
use seedcheck_harness::HarnessConfig;

/// Storage allocation for both transfer tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageArg {
    Sparse,
    Full,
}

impl From<StorageArg> for StorageMode {
    fn from(arg: StorageArg) -> Self {
        match arg {
            StorageArg::Sparse => StorageMode::Sparse,
            StorageArg::Full => StorageMode::Full,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "seedcheck")]
#[command(about = "Verifies that a leecher becomes a seed within a deadline")]
pub struct Cli {
    /// Piece length of the synthetic content in bytes
    #[arg(long)]
    pub piece_length: Option<u32>,

    /// Number of pieces in the synthetic content
    #[arg(long)]
    pub piece_count: Option<u32>,

    /// Seed of the content byte stream
    #[arg(long)]
    pub seed: Option<u64>,

    /// Seconds the leecher has to become a seed
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Listen address of the seeding session
    #[arg(long)]
    pub seeder_addr: Option<SocketAddr>,

    /// Listen address of the downloading session
    #[arg(long)]
    pub leecher_addr: Option<SocketAddr>,

    /// Directory the scratch directories are created in
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// How unwritten regions of the content file are allocated
    #[arg(long, value_enum, default_value_t = StorageArg::Sparse)]
    pub storage_mode: StorageArg,

    /// Skip connecting the leecher to the seeder (the run then times out)
    #[arg(long)]
    pub no_connect: bool,

    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info)]
    pub log_level: CliLogLevel,

    /// Directory for a full trace of the run
    #[arg(long)]
    pub logs_dir: Option<PathBuf>,
}

impl Cli {
    /// Applies the flags on top of environment and default configuration.
    pub fn into_config(self) -> HarnessConfig {
        let mut config = HarnessConfig::from_env();

        if let Some(piece_length) = self.piece_length {
            config.fixture.piece_length = piece_length;
        }
        if let Some(piece_count) = self.piece_count {
            config.fixture.piece_count = piece_count;
        }
        if let Some(seed) = self.seed {
            config.fixture.seed = seed;
        }
        if let Some(secs) = self.deadline_secs {
            config.poll.deadline = Duration::from_secs(secs);
        }
        if let Some(address) = self.seeder_addr {
            config.seeder_address = address;
        }
        if let Some(address) = self.leecher_addr {
            config.leecher_address = address;
        }
        if let Some(work_dir) = self.work_dir {
            config.work_root = work_dir;
        }
        config.flags.storage_mode = self.storage_mode.into();
        config.connect_peers = !self.no_connect;

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "seedcheck",
            "--piece-count",
            "4",
            "--deadline-secs",
            "2",
            "--seeder-addr",
            "127.0.0.1:0",
            "--storage-mode",
            "full",
            "--no-connect",
        ])
        .unwrap();

        let config = cli.into_config();
        assert_eq!(config.fixture.piece_count, 4);
        assert_eq!(config.poll.deadline, Duration::from_secs(2));
        assert_eq!(config.seeder_address.port(), 0);
        assert_eq!(config.flags.storage_mode, StorageMode::Full);
        assert!(!config.connect_peers);
    }

    #[test]
    fn test_rejects_unknown_storage_mode() {
        assert!(Cli::try_parse_from(["seedcheck", "--storage-mode", "compact"]).is_err());
    }
}
