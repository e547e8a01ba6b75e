//! Harness error types.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use seedcheck_core::TorrentError;

use crate::endpoint::EndpointState;

/// Fatal harness errors.
///
/// Each of these stops the run before monitoring starts. A transfer that
/// misses its deadline is not an error; see [`crate::MonitorVerdict`].
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Failed to prepare fixture storage at {path}")]
    FixtureIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid fixture: {reason}")]
    InvalidFixture { reason: String },

    #[error("Endpoint {label} did not report a listening address within {timeout:?}")]
    ListenTimeout { label: String, timeout: Duration },

    #[error("Endpoint {label} failed to listen on {address}: {reason}")]
    ListenFailed {
        label: String,
        address: SocketAddr,
        reason: String,
    },

    #[error("Paired descriptors disagree: {reason}")]
    SetupMismatch { reason: String },

    #[error("Endpoint {label} cannot move from {from} to {to}")]
    InvalidTransition {
        label: String,
        from: EndpointState,
        to: EndpointState,
    },

    #[error(transparent)]
    Engine(#[from] TorrentError),
}

/// Convenience alias for harness results.
pub type Result<T> = std::result::Result<T, HarnessError>;
