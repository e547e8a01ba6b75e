//! Asynchronous engine events and the bounded queue that carries them.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::torrent::{InfoHash, PieceIndex};

/// Kind of event posted by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertKind {
    /// The session listener bound successfully
    ListenSucceeded { address: SocketAddr },
    /// The session listener could not bind
    ListenFailed { address: SocketAddr, reason: String },
    /// A transfer task was registered
    TorrentAdded { info_hash: InfoHash },
    /// A transfer task started transferring
    TorrentResumed { info_hash: InfoHash },
    /// A transfer task stopped transferring
    TorrentPaused { info_hash: InfoHash },
    /// A peer connection completed its handshake
    PeerConnected {
        info_hash: InfoHash,
        address: SocketAddr,
    },
    /// A peer connection closed or failed
    PeerDisconnected {
        info_hash: InfoHash,
        address: SocketAddr,
        reason: Option<String>,
    },
    /// A piece was downloaded and verified
    PieceFinished {
        info_hash: InfoHash,
        piece_index: PieceIndex,
    },
    /// A downloaded piece failed hash verification
    HashFailed {
        info_hash: InfoHash,
        piece_index: PieceIndex,
    },
    /// Every piece of a task is now held
    TorrentFinished { info_hash: InfoHash },
    /// The session finished tearing down
    SessionStopped,
}

/// Timestamped engine event.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub timestamp: Instant,
    pub kind: AlertKind,
}

/// Bounded FIFO of alerts with an async wake-up.
///
/// When full, the oldest alert is dropped to make room.
pub struct AlertQueue {
    alerts: Mutex<VecDeque<Alert>>,
    capacity: usize,
    notify: Notify,
}

impl AlertQueue {
    /// Creates an empty queue holding at most `capacity` alerts.
    pub fn new(capacity: usize) -> Self {
        Self {
            alerts: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Appends an alert and wakes every waiter.
    pub fn post(&self, kind: AlertKind) {
        tracing::trace!("Alert: {:?}", kind);
        {
            let mut alerts = self.alerts.lock();
            if alerts.len() == self.capacity {
                alerts.pop_front();
            }
            alerts.push_back(Alert {
                timestamp: Instant::now(),
                kind,
            });
        }
        self.notify.notify_waiters();
    }

    /// Removes and returns every queued alert, oldest first.
    pub fn pop_all(&self) -> Vec<Alert> {
        self.alerts.lock().drain(..).collect()
    }

    /// Returns the number of queued alerts.
    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    /// Returns true when no alert is queued.
    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }

    /// Waits until an alert is queued or `max_duration` elapses.
    ///
    /// Returns true if an alert is available. Returns immediately when the
    /// queue is already non-empty; alerts are not consumed.
    pub async fn wait(&self, max_duration: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking so a post between check and await is not lost
        notified.as_mut().enable();

        if !self.is_empty() {
            return true;
        }

        tokio::time::timeout(max_duration, notified).await.is_ok()
    }
}
