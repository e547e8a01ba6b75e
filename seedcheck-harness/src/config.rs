//! Harness configuration.
//!
//! Defaults reproduce the reference run: 13 pieces of 32 KiB, seeder on port
//! 48075, leecher on port 49075, a 10 second deadline polled every 100 ms.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use seedcheck_core::{StorageMode, TransferFlags};

pub const DEFAULT_PIECE_LENGTH: u32 = 32_768;
pub const DEFAULT_PIECE_COUNT: u32 = 13;
pub const DEFAULT_SEED: u64 = 0x5eed_c0de;
pub const DEFAULT_SEEDER_PORT: u16 = 48_075;
pub const DEFAULT_LEECHER_PORT: u16 = 49_075;

/// Shape and seed of the synthetic content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureSpec {
    /// File name of the content inside the seeder directory
    pub name: String,
    pub piece_length: u32,
    pub piece_count: u32,
    /// Length of the final piece; `None` means a full piece
    pub last_piece_length: Option<u32>,
    /// Seed of the content byte stream
    pub seed: u64,
}

impl Default for FixtureSpec {
    fn default() -> Self {
        Self {
            name: "temporary".to_string(),
            piece_length: DEFAULT_PIECE_LENGTH,
            piece_count: DEFAULT_PIECE_COUNT,
            last_piece_length: None,
            seed: DEFAULT_SEED,
        }
    }
}

impl FixtureSpec {
    /// Effective length of the final piece.
    pub fn last_piece_length(&self) -> u32 {
        self.last_piece_length.unwrap_or(self.piece_length)
    }

    /// Total content length in bytes.
    pub fn total_length(&self) -> u64 {
        u64::from(self.piece_length) * u64::from(self.piece_count.saturating_sub(1))
            + u64::from(self.last_piece_length())
    }
}

/// Timing of the completion monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wall-clock bound on the whole monitor loop
    pub deadline: Duration,
    /// Longest a single alert wait may block
    pub wait_bound: Duration,
    /// Sleep between iterations
    pub backoff: Duration,
    /// Safety cap on iterations; the deadline is the effective bound
    pub max_iterations: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(10),
            wait_bound: Duration::from_millis(100),
            backoff: Duration::from_millis(100),
            max_iterations: 20_000,
        }
    }
}

/// Complete configuration of one harness run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture: FixtureSpec,
    pub seeder_address: SocketAddr,
    pub leecher_address: SocketAddr,
    /// Directory the two scratch directories are created in
    pub work_root: PathBuf,
    pub seeder_dir_name: String,
    pub leecher_dir_name: String,
    /// Bound on each endpoint's wait for a listening address
    pub listen_timeout: Duration,
    pub poll: PollPolicy,
    pub flags: TransferFlags,
    /// Whether the leecher connects to the seeder; off only to force a timeout
    pub connect_peers: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            fixture: FixtureSpec::default(),
            seeder_address: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_SEEDER_PORT)),
            leecher_address: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_LEECHER_PORT)),
            work_root: PathBuf::from("."),
            seeder_dir_name: "tmp1_seedcheck".to_string(),
            leecher_dir_name: "tmp2_seedcheck".to_string(),
            listen_timeout: Duration::from_secs(5),
            poll: PollPolicy::default(),
            flags: TransferFlags::manual(StorageMode::Sparse),
            connect_peers: true,
        }
    }
}

impl HarnessConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable or zero values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(deadline) = std::env::var("SEEDCHECK_DEADLINE_SECS")
            && let Ok(secs) = deadline.parse::<u64>()
            && secs > 0
        {
            config.poll.deadline = Duration::from_secs(secs);
        }

        if let Ok(piece_length) = std::env::var("SEEDCHECK_PIECE_LENGTH")
            && let Ok(length) = piece_length.parse::<u32>()
            && length > 0
        {
            config.fixture.piece_length = length;
        }

        if let Ok(piece_count) = std::env::var("SEEDCHECK_PIECE_COUNT")
            && let Ok(count) = piece_count.parse::<u32>()
            && count > 0
        {
            config.fixture.piece_count = count;
        }

        if let Ok(seed) = std::env::var("SEEDCHECK_SEED")
            && let Ok(seed) = seed.parse::<u64>()
        {
            config.fixture.seed = seed;
        }

        if let Ok(work_dir) = std::env::var("SEEDCHECK_WORK_DIR")
            && !work_dir.is_empty()
        {
            config.work_root = PathBuf::from(work_dir);
        }

        config
    }

    /// Scratch directory holding the seeder's content.
    pub fn seeder_dir(&self) -> PathBuf {
        self.work_root.join(&self.seeder_dir_name)
    }

    /// Scratch directory the leecher downloads into.
    pub fn leecher_dir(&self) -> PathBuf {
        self.work_root.join(&self.leecher_dir_name)
    }
}
