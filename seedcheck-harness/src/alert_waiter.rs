//! Bounded wait on a session's alert queue.

use std::time::Duration;

use seedcheck_core::SessionHandle;

/// Yields until an engine alert arrives or a short bound elapses.
///
/// Alerts are a wake signal only: after a wake-up the pending alerts are
/// drained and counted, never inspected. A timeout is a normal outcome.
#[derive(Debug)]
pub struct AlertWaiter {
    bound: Duration,
    drained: u64,
}

impl AlertWaiter {
    pub fn new(bound: Duration) -> Self {
        Self { bound, drained: 0 }
    }

    /// Waits on `session`; returns true if an alert woke the caller.
    pub async fn wait(&mut self, session: &SessionHandle) -> bool {
        let woke = session.wait_for_alert(self.bound).await;
        if woke {
            self.drained += session.pop_alerts().len() as u64;
        }
        woke
    }

    /// Total alerts drained so far.
    pub fn drained(&self) -> u64 {
        self.drained
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use seedcheck_core::{EngineConfig, Session};

    use super::*;

    #[tokio::test]
    async fn test_wait_drains_and_then_times_out() {
        let session = Session::spawn(EngineConfig::default());
        let mut waiter = AlertWaiter::new(Duration::from_secs(5));

        // Listen alert wakes the first wait
        assert!(waiter.wait(session.handle()).await);
        assert!(waiter.drained() >= 1);
        assert!(session.handle().pop_alerts().is_empty());

        let mut short = AlertWaiter::new(Duration::from_millis(50));
        let started = Instant::now();
        assert!(!short.wait(session.handle()).await);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(short.drained(), 0);

        session.abort().join().await.unwrap();
    }
}
