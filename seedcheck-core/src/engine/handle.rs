//! Handles for communicating with the session actor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::actor::run_actor_loop;
use super::alert::{Alert, AlertQueue};
use super::commands::{AddTorrentParams, SessionCommand, TransferStatus};
use super::core::SessionCore;
use super::shutdown::ShutdownToken;
use crate::config::EngineConfig;
use crate::torrent::{InfoHash, TorrentError, TorrentMetadata};

/// Capacity of the command channel
const COMMAND_QUEUE: usize = 100;

/// A running engine session.
///
/// Owns the actor task. Use [`Session::handle`] for day-to-day commands and
/// [`Session::abort`] to begin teardown.
pub struct Session {
    handle: SessionHandle,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Session {
    /// Spawns a session actor with the given configuration.
    ///
    /// The listener binds asynchronously; its outcome is posted as a
    /// `ListenSucceeded` or `ListenFailed` alert. Must be called from within a
    /// Tokio runtime.
    ///
    /// # Examples
    /// ```rust,no_run
    /// # #[tokio::main]
    /// # async fn main() {
    /// use seedcheck_core::{EngineConfig, Session};
    ///
    /// let session = Session::spawn(EngineConfig::default());
    /// session.handle().wait_for_alert(std::time::Duration::from_secs(1)).await;
    /// let _ = session.abort().join().await;
    /// # }
    /// ```
    pub fn spawn(config: EngineConfig) -> Self {
        let alerts = Arc::new(AlertQueue::new(config.torrent.alert_queue_size));
        let (sender, receiver) = mpsc::channel(COMMAND_QUEUE);
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let (shutdown, shutdown_receiver) = watch::channel(false);

        let core = SessionCore::new(config, alerts.clone(), event_sender);
        let task = tokio::spawn(run_actor_loop(
            core,
            receiver,
            event_receiver,
            shutdown_receiver,
        ));

        Self {
            handle: SessionHandle { sender, alerts },
            shutdown,
            task,
        }
    }

    /// Returns the command handle for this session.
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Signals the session to stop and returns immediately.
    ///
    /// Teardown proceeds in the background; await the returned token to know
    /// when it has finished. Several sessions can be aborted back to back so
    /// their teardowns overlap.
    pub fn abort(self) -> ShutdownToken {
        self.shutdown.send_replace(true);
        tracing::debug!("Session abort requested");
        ShutdownToken::new(self.task, self.shutdown)
    }
}

/// Cloneable handle for sending commands to a session.
///
/// Every method fails with `TorrentError::EngineShutdown` once the actor has
/// stopped.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
    alerts: Arc<AlertQueue>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        command: SessionCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, TorrentError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| TorrentError::EngineShutdown)?;

        rx.await.map_err(|_| TorrentError::EngineShutdown)
    }

    /// Registers a transfer task and returns its handle.
    ///
    /// # Errors
    /// - `TorrentError::InvalidTorrentFile` - Inconsistent metadata
    /// - `TorrentError::DuplicateTorrent` - Info hash already registered
    /// - `TorrentError::Io` - Content file could not be prepared
    /// - `TorrentError::EngineShutdown` - Session has stopped
    pub async fn add_torrent(&self, params: AddTorrentParams) -> Result<TransferHandle, TorrentError> {
        let (responder, rx) = oneshot::channel();
        self.request(SessionCommand::AddTorrent { params, responder }, rx)
            .await?
    }

    /// Asks the session to connect to a peer for a task.
    ///
    /// Returns once the attempt is scheduled; the outcome arrives as a
    /// `PeerConnected` or `PeerDisconnected` alert.
    ///
    /// # Errors
    /// - `TorrentError::TorrentNotFound` - Info hash not registered
    /// - `TorrentError::EngineShutdown` - Session has stopped
    pub async fn connect_peer(
        &self,
        info_hash: InfoHash,
        address: SocketAddr,
    ) -> Result<(), TorrentError> {
        let (responder, rx) = oneshot::channel();
        self.request(
            SessionCommand::ConnectPeer {
                info_hash,
                address,
                responder,
            },
            rx,
        )
        .await?
    }

    /// Starts transferring a task.
    ///
    /// # Errors
    /// - `TorrentError::TorrentNotFound` - Info hash not registered
    /// - `TorrentError::EngineShutdown` - Session has stopped
    pub async fn resume(&self, info_hash: InfoHash) -> Result<(), TorrentError> {
        let (responder, rx) = oneshot::channel();
        self.request(
            SessionCommand::Resume {
                info_hash,
                responder,
            },
            rx,
        )
        .await?
    }

    /// Stops transferring a task. Connections stay open but go idle.
    ///
    /// # Errors
    /// - `TorrentError::TorrentNotFound` - Info hash not registered
    /// - `TorrentError::EngineShutdown` - Session has stopped
    pub async fn pause(&self, info_hash: InfoHash) -> Result<(), TorrentError> {
        let (responder, rx) = oneshot::channel();
        self.request(
            SessionCommand::Pause {
                info_hash,
                responder,
            },
            rx,
        )
        .await?
    }

    /// Returns the bound listen address, or `None` if binding failed or has
    /// not happened yet.
    ///
    /// # Errors
    /// - `TorrentError::EngineShutdown` - Session has stopped
    pub async fn listen_address(&self) -> Result<Option<SocketAddr>, TorrentError> {
        let (responder, rx) = oneshot::channel();
        self.request(SessionCommand::ListenAddress { responder }, rx)
            .await
    }

    /// Waits up to `max_duration` for an alert to be queued.
    ///
    /// Returns true if one is available. Alerts are not consumed.
    pub async fn wait_for_alert(&self, max_duration: Duration) -> bool {
        self.alerts.wait(max_duration).await
    }

    /// Drains every queued alert, oldest first.
    pub fn pop_alerts(&self) -> Vec<Alert> {
        self.alerts.pop_all()
    }

    /// Returns true while the actor accepts commands.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Handle to one registered transfer task.
///
/// Status is read synchronously from the latest snapshot published by the
/// session; it keeps the final snapshot after the session stops.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    info_hash: InfoHash,
    metadata: Arc<TorrentMetadata>,
    status: watch::Receiver<TransferStatus>,
}

impl TransferHandle {
    pub(crate) fn new(
        info_hash: InfoHash,
        metadata: Arc<TorrentMetadata>,
        status: watch::Receiver<TransferStatus>,
    ) -> Self {
        Self {
            info_hash,
            metadata,
            status,
        }
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    pub fn metadata(&self) -> &Arc<TorrentMetadata> {
        &self.metadata
    }

    /// Returns the latest status snapshot.
    pub fn status(&self) -> TransferStatus {
        self.status.borrow().clone()
    }
}
