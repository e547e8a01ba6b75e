//! Tokens for sessions whose teardown is in progress.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::torrent::TorrentError;

/// Proof that a session abort was requested.
///
/// Awaiting [`ShutdownToken::join`] blocks until the session has released its
/// listener and closed every connection. Dropping the token without joining
/// lets teardown finish unobserved.
pub struct ShutdownToken {
    task: JoinHandle<()>,
    requested_at: Instant,
    // Held so the actor sees the signal rather than a dropped sender
    _signal: watch::Sender<bool>,
}

impl ShutdownToken {
    pub(crate) fn new(task: JoinHandle<()>, signal: watch::Sender<bool>) -> Self {
        Self {
            task,
            requested_at: Instant::now(),
            _signal: signal,
        }
    }

    /// Returns true once teardown has completed.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for teardown to complete and returns the time since abort.
    ///
    /// # Errors
    ///
    /// - `TorrentError::EngineShutdown` - If the session task panicked or was cancelled
    pub async fn join(self) -> Result<Duration, TorrentError> {
        match self.task.await {
            Ok(()) => Ok(self.requested_at.elapsed()),
            Err(e) => {
                tracing::error!("Session task ended abnormally: {}", e);
                Err(TorrentError::EngineShutdown)
            }
        }
    }
}

impl std::fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("finished", &self.is_finished())
            .field("requested_at", &self.requested_at)
            .finish()
    }
}
