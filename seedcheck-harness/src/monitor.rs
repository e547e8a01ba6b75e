//! Bounded polling loop that waits for the leecher to become a seed.

use std::time::{Duration, Instant};

use seedcheck_core::{SessionHandle, TransferStatus};

use crate::alert_waiter::AlertWaiter;
use crate::config::PollPolicy;
use crate::orchestrator::TransferPair;

/// Terminal outcome of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorVerdict {
    /// The leecher reported seeding
    Success,
    /// The deadline or the iteration cap was reached first
    TimedOut,
}

/// Monitor state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Polling { iteration: u32 },
    Done(MonitorVerdict),
}

impl MonitorState {
    pub fn start() -> Self {
        MonitorState::Polling { iteration: 0 }
    }

    pub fn verdict(self) -> Option<MonitorVerdict> {
        match self {
            MonitorState::Done(verdict) => Some(verdict),
            MonitorState::Polling { .. } => None,
        }
    }
}

/// Advances the monitor.
///
/// Without a snapshot this is the deadline check that opens each iteration.
/// With the leecher's snapshot it closes the iteration: seeding wins, then the
/// iteration cap applies. `Done` is absorbing.
pub fn next_state(
    state: MonitorState,
    elapsed: Duration,
    leecher: Option<&TransferStatus>,
    policy: &PollPolicy,
) -> MonitorState {
    let MonitorState::Polling { iteration } = state else {
        return state;
    };

    match leecher {
        None if elapsed > policy.deadline => MonitorState::Done(MonitorVerdict::TimedOut),
        None => state,
        Some(status) if status.is_seeding => MonitorState::Done(MonitorVerdict::Success),
        Some(_) if iteration + 1 >= policy.max_iterations => {
            MonitorState::Done(MonitorVerdict::TimedOut)
        }
        Some(_) => MonitorState::Polling {
            iteration: iteration + 1,
        },
    }
}

/// What the monitor saw.
///
/// The snapshots are the last ones sampled, so a timed-out run still shows how
/// far the transfer got.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorReport {
    pub verdict: MonitorVerdict,
    pub elapsed: Duration,
    pub iterations: u32,
    pub alerts_drained: u64,
    pub seeder: TransferStatus,
    pub leecher: TransferStatus,
}

/// Observes a paired transfer until the leecher seeds or time runs out.
///
/// Never mutates session or task state.
#[derive(Debug, Clone)]
pub struct CompletionMonitor {
    policy: PollPolicy,
}

impl CompletionMonitor {
    pub fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    /// Runs the polling loop against `pair`, waking on `leecher_session` alerts.
    pub async fn run(&self, pair: &TransferPair, leecher_session: &SessionHandle) -> MonitorReport {
        let started = Instant::now();
        let mut waiter = AlertWaiter::new(self.policy.wait_bound);
        let mut state = MonitorState::start();
        let mut iterations = 0;
        let mut seeder = pair.seeder.status();
        let mut leecher = pair.leecher.status();
        let mut last_reported = None;

        let verdict = loop {
            state = next_state(state, started.elapsed(), None, &self.policy);
            if let Some(verdict) = state.verdict() {
                tracing::debug!("Deadline of {:?} exceeded", self.policy.deadline);
                break verdict;
            }

            waiter.wait(leecher_session).await;

            seeder = pair.seeder.status();
            leecher = pair.leecher.status();
            iterations += 1;
            if last_reported != Some(leecher.pieces_complete) {
                last_reported = Some(leecher.pieces_complete);
                tracing::debug!(
                    "Leecher {}/{} pieces ({} peers), seeder {}/{}",
                    leecher.pieces_complete,
                    leecher.piece_count,
                    leecher.peers,
                    seeder.pieces_complete,
                    seeder.piece_count
                );
            }

            state = next_state(state, started.elapsed(), Some(&leecher), &self.policy);
            if let Some(verdict) = state.verdict() {
                if verdict == MonitorVerdict::TimedOut {
                    tracing::warn!("Iteration cap of {} reached", self.policy.max_iterations);
                }
                break verdict;
            }

            tokio::time::sleep(self.policy.backoff).await;
        };

        let elapsed = started.elapsed();
        match verdict {
            MonitorVerdict::Success => tracing::info!(
                "Leecher seeding after {:?} ({} iterations)",
                elapsed,
                iterations
            ),
            MonitorVerdict::TimedOut => tracing::error!(
                "Leecher is not seeding: {}/{} pieces after {:?}",
                leecher.pieces_complete,
                leecher.piece_count,
                elapsed
            ),
        }

        MonitorReport {
            verdict,
            elapsed,
            iterations,
            alerts_drained: waiter.drained(),
            seeder,
            leecher,
        }
    }
}
