//! Centralized configuration for the transfer engine.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Largest block a peer may request
pub const MAX_BLOCK_SIZE: u32 = 128 * 1024;

/// Central configuration for one engine session.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub torrent: TorrentConfig,
    pub network: NetworkConfig,
}

/// BitTorrent protocol-specific configuration.
///
/// Controls block sizing, request pipelining and the alert queue.
#[derive(Debug, Clone)]
pub struct TorrentConfig {
    /// BitTorrent client identifier
    pub client_id: &'static str,
    /// Size of a single block request
    pub block_size: u32,
    /// Maximum block requests in flight per peer connection
    pub max_outstanding_requests: usize,
    /// Maximum queued alerts before the oldest are dropped
    pub alert_queue_size: usize,
    /// Maximum auto-managed torrents allowed to transfer at once
    pub active_limit: usize,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            client_id: "-SC0001-",
            block_size: 16_384, // 16 KiB
            max_outstanding_requests: 16,
            alert_queue_size: 1000,
            active_limit: 8,
        }
    }
}

/// Network communication configuration.
///
/// Controls the listen address and peer connection timeouts.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Address the session listener binds to (port 0 picks an ephemeral port)
    pub listen_address: SocketAddr,
    /// Outbound TCP connect timeout
    pub connect_timeout: Duration,
    /// Timeout for the 68-byte handshake exchange
    pub handshake_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration bound to a specific listen address.
    pub fn with_listen_address(listen_address: SocketAddr) -> Self {
        let mut config = Self::from_env();
        config.network.listen_address = listen_address;
        config
    }

    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(timeout) = std::env::var("SEEDCHECK_CONNECT_TIMEOUT_MS")
            && let Ok(millis) = timeout.parse::<u64>()
        {
            config.network.connect_timeout = Duration::from_millis(millis);
        }

        if let Ok(block_size) = std::env::var("SEEDCHECK_BLOCK_SIZE")
            && let Ok(size) = block_size.parse::<u32>()
            && size > 0
        {
            config.torrent.block_size = size;
        }

        if let Ok(queue_size) = std::env::var("SEEDCHECK_ALERT_QUEUE_SIZE")
            && let Ok(size) = queue_size.parse::<usize>()
            && size > 0
        {
            config.torrent.alert_queue_size = size;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = EngineConfig::default();

        assert_eq!(config.torrent.client_id, "-SC0001-");
        assert_eq!(config.torrent.block_size, 16_384);
        assert_eq!(config.torrent.alert_queue_size, 1000);
        assert_eq!(config.network.listen_address.port(), 0);
        assert!(config.network.listen_address.ip().is_loopback());
        assert_eq!(config.network.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_with_listen_address() {
        let address: SocketAddr = "127.0.0.1:48075".parse().unwrap();
        let config = EngineConfig::with_listen_address(address);

        assert_eq!(config.network.listen_address, address);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("SEEDCHECK_CONNECT_TIMEOUT_MS", "250");
            std::env::set_var("SEEDCHECK_BLOCK_SIZE", "8192");
            std::env::set_var("SEEDCHECK_ALERT_QUEUE_SIZE", "0");
        }

        let config = EngineConfig::from_env();

        assert_eq!(config.network.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.torrent.block_size, 8192);
        // Zero is rejected and the default kept
        assert_eq!(config.torrent.alert_queue_size, 1000);

        unsafe {
            std::env::remove_var("SEEDCHECK_CONNECT_TIMEOUT_MS");
            std::env::remove_var("SEEDCHECK_BLOCK_SIZE");
            std::env::remove_var("SEEDCHECK_ALERT_QUEUE_SIZE");
        }
    }
}
