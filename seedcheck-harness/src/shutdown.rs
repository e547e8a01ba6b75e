//! Issue-all-then-join-all teardown of the endpoints.

use std::time::{Duration, Instant};

use futures::future::join_all;
use seedcheck_core::{ShutdownToken, TorrentError};

use crate::endpoint::PeerEndpoint;

/// Teardown result of one endpoint.
#[derive(Debug)]
pub struct ShutdownEntry {
    pub label: String,
    /// Time from abort to completed teardown
    pub outcome: Result<Duration, TorrentError>,
}

/// Teardown results of every aborted endpoint.
#[derive(Debug)]
pub struct ShutdownReport {
    pub entries: Vec<ShutdownEntry>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Returns true if every teardown completed normally.
    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(|entry| entry.outcome.is_ok())
    }
}

/// Aborts sessions without blocking, then finalizes them together.
pub struct ShutdownCoordinator;

impl ShutdownCoordinator {
    /// Issues abort on every endpoint without waiting for any of them.
    ///
    /// Endpoints already aborting or closed are skipped.
    pub fn abort_all(endpoints: &mut [&mut PeerEndpoint]) -> Vec<(String, ShutdownToken)> {
        endpoints
            .iter_mut()
            .filter_map(|endpoint| match endpoint.begin_abort() {
                Ok(token) => Some((endpoint.label().to_string(), token)),
                Err(e) => {
                    tracing::warn!("Skipping abort: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Joins every token concurrently; join order does not matter.
    pub async fn join_all(tokens: Vec<(String, ShutdownToken)>) -> ShutdownReport {
        let started = Instant::now();
        let entries = join_all(tokens.into_iter().map(|(label, token)| async move {
            let outcome = token.join().await;
            match &outcome {
                Ok(duration) => tracing::debug!("{} closed after {:?}", label, duration),
                Err(e) => tracing::error!("{} teardown failed: {}", label, e),
            }
            ShutdownEntry { label, outcome }
        }))
        .await;

        ShutdownReport {
            entries,
            elapsed: started.elapsed(),
        }
    }

    /// Aborts and joins every endpoint, leaving each `Closed`.
    pub async fn shutdown(endpoints: &mut [&mut PeerEndpoint]) -> ShutdownReport {
        let tokens = Self::abort_all(endpoints);
        let report = Self::join_all(tokens).await;

        for endpoint in endpoints.iter_mut() {
            if let Err(e) = endpoint.mark_closed() {
                tracing::debug!("{}", e);
            }
        }

        tracing::info!(
            "Shut down {} sessions in {:?}",
            report.entries.len(),
            report.elapsed
        );
        report
    }
}
