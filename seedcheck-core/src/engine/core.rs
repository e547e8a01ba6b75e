//! Session state owned by the actor: transfer tasks, listener and peer tasks.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use super::alert::{AlertKind, AlertQueue};
use super::commands::{AddTorrentParams, PeerEvent, TransferStatus};
use super::handle::TransferHandle;
use super::peer::{PeerContext, run_inbound, run_outbound};
use crate::config::EngineConfig;
use crate::torrent::{
    BitTorrentPeerProtocol, FilePieceStore, InfoHash, PeerHandshake, PeerId, PieceIndex,
    PieceStore, TorrentError, TorrentMetadata,
};

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A registered transfer task.
struct TorrentTask {
    metadata: Arc<TorrentMetadata>,
    store: Arc<FilePieceStore>,
    auto_managed: bool,
    active: watch::Sender<bool>,
    status: watch::Sender<TransferStatus>,
}

impl TorrentTask {
    fn is_seeding(&self) -> bool {
        self.status.borrow().is_seeding
    }

    fn is_active(&self) -> bool {
        *self.active.borrow()
    }
}

/// Core session state.
///
/// Only the actor task touches this struct, so no locking is needed; connection
/// tasks report back through the unbounded event channel.
pub(crate) struct SessionCore {
    config: EngineConfig,
    peer_id: PeerId,
    protocol: BitTorrentPeerProtocol,
    alerts: Arc<AlertQueue>,
    events: mpsc::UnboundedSender<PeerEvent>,
    listen_address: Option<SocketAddr>,
    listener: Option<JoinHandle<()>>,
    torrents: HashMap<InfoHash, TorrentTask>,
    /// Registration order, consulted by the queue policy
    order: Vec<InfoHash>,
    peer_tasks: JoinSet<()>,
}

impl SessionCore {
    pub(crate) fn new(
        config: EngineConfig,
        alerts: Arc<AlertQueue>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        let protocol = BitTorrentPeerProtocol::new(
            config.network.connect_timeout,
            config.network.handshake_timeout,
        );
        Self {
            peer_id: PeerId::generate(config.torrent.client_id),
            protocol,
            config,
            alerts,
            events,
            listen_address: None,
            listener: None,
            torrents: HashMap::new(),
            order: Vec::new(),
            peer_tasks: JoinSet::new(),
        }
    }

    /// Binds the listener and posts the outcome as an alert.
    pub(crate) async fn start_listener(&mut self) {
        let address = self.config.network.listen_address;
        match TcpListener::bind(address).await {
            Ok(listener) => {
                let bound = listener.local_addr().unwrap_or(address);
                tracing::info!("Session listening on {}", bound);
                self.listen_address = Some(bound);
                self.listener = Some(tokio::spawn(accept_loop(listener, self.events.clone())));
                self.alerts.post(AlertKind::ListenSucceeded { address: bound });
            }
            Err(e) => {
                tracing::error!("Failed to listen on {}: {}", address, e);
                self.alerts.post(AlertKind::ListenFailed {
                    address,
                    reason: e.to_string(),
                });
            }
        }
    }

    pub(crate) fn listen_address(&self) -> Option<SocketAddr> {
        self.listen_address
    }

    /// Registers a transfer task bound to a save path.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTorrentFile` - If the metadata is inconsistent
    /// - `TorrentError::DuplicateTorrent` - If the info hash is already registered
    /// - `TorrentError::Io` - If the content file cannot be prepared
    pub(crate) async fn add_torrent(
        &mut self,
        params: AddTorrentParams,
    ) -> Result<TransferHandle, TorrentError> {
        let AddTorrentParams {
            metadata,
            save_path,
            flags,
        } = params;
        metadata.validate()?;

        let info_hash = metadata.info_hash;
        if self.torrents.contains_key(&info_hash) {
            return Err(TorrentError::DuplicateTorrent { info_hash });
        }

        let store =
            Arc::new(FilePieceStore::open(&save_path, metadata.clone(), flags.storage_mode).await?);
        let pieces_complete = store.completed_count();
        let piece_count = metadata.piece_count();

        let (active, _) = watch::channel(flags.auto_start);
        let (status, status_rx) = watch::channel(TransferStatus {
            is_seeding: pieces_complete == piece_count,
            pieces_complete,
            piece_count,
            paused: !flags.auto_start,
            ..TransferStatus::default()
        });

        tracing::info!(
            "Added torrent {} at {} ({}/{} pieces, auto_start={}, auto_manage={})",
            info_hash,
            save_path.display(),
            pieces_complete,
            piece_count,
            flags.auto_start,
            flags.auto_manage
        );

        self.torrents.insert(
            info_hash,
            TorrentTask {
                metadata: metadata.clone(),
                store,
                auto_managed: flags.auto_manage,
                active,
                status,
            },
        );
        self.order.push(info_hash);
        self.alerts.post(AlertKind::TorrentAdded { info_hash });
        if flags.auto_start {
            self.alerts.post(AlertKind::TorrentResumed { info_hash });
        }
        self.apply_queue_policy();

        Ok(TransferHandle::new(info_hash, metadata, status_rx))
    }

    /// Starts an outbound connection for a registered task.
    ///
    /// Returns once the connection task is spawned; success or failure of the
    /// connection itself is reported through alerts.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the info hash is not registered
    pub(crate) fn connect_peer(
        &mut self,
        info_hash: InfoHash,
        address: SocketAddr,
    ) -> Result<(), TorrentError> {
        let context = self.peer_context(info_hash)?;
        let handshake = PeerHandshake::new(info_hash, self.peer_id);
        tracing::debug!("Connecting to {} for {}", address, info_hash);
        self.peer_tasks.spawn(run_outbound(
            self.protocol.clone(),
            address,
            handshake,
            context,
        ));
        Ok(())
    }

    /// Resumes or pauses a registered task.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the info hash is not registered
    pub(crate) fn set_active(
        &mut self,
        info_hash: InfoHash,
        is_active: bool,
    ) -> Result<(), TorrentError> {
        if !self.torrents.contains_key(&info_hash) {
            return Err(TorrentError::TorrentNotFound { info_hash });
        }
        self.transition(info_hash, is_active);
        Ok(())
    }

    /// Dispatches an event from the listener or a connection task.
    pub(crate) fn handle_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Accepted { mut stream, address } => {
                let protocol = self.protocol.clone();
                let events = self.events.clone();
                self.peer_tasks.spawn(async move {
                    match protocol.read_handshake(&mut stream).await {
                        Ok(handshake) => {
                            let _ = events.send(PeerEvent::InboundHandshake {
                                stream,
                                address,
                                handshake,
                            });
                        }
                        Err(e) => tracing::debug!("Dropping inbound {}: {}", address, e),
                    }
                });
            }
            PeerEvent::InboundHandshake {
                stream,
                address,
                handshake,
            } => {
                let info_hash = handshake.info_hash;
                match self.peer_context(info_hash) {
                    Ok(context) => {
                        let ours = PeerHandshake::new(info_hash, self.peer_id);
                        self.peer_tasks.spawn(run_inbound(
                            self.protocol.clone(),
                            stream,
                            address,
                            handshake,
                            ours,
                            context,
                        ));
                    }
                    Err(_) => {
                        tracing::debug!("Dropping inbound {} for unknown torrent {}", address, info_hash);
                    }
                }
            }
            PeerEvent::Connected { info_hash, address } => {
                if let Some(task) = self.torrents.get(&info_hash) {
                    task.status.send_modify(|status| status.peers += 1);
                }
                tracing::info!("Peer {} connected for {}", address, info_hash);
                self.alerts
                    .post(AlertKind::PeerConnected { info_hash, address });
            }
            PeerEvent::ConnectFailed {
                info_hash,
                address,
                reason,
            } => {
                self.alerts.post(AlertKind::PeerDisconnected {
                    info_hash,
                    address,
                    reason: Some(reason),
                });
            }
            PeerEvent::Disconnected {
                info_hash,
                address,
                reason,
            } => {
                if let Some(task) = self.torrents.get(&info_hash) {
                    task.status
                        .send_modify(|status| status.peers = status.peers.saturating_sub(1));
                }
                tracing::debug!("Peer {} disconnected from {}", address, info_hash);
                self.alerts.post(AlertKind::PeerDisconnected {
                    info_hash,
                    address,
                    reason,
                });
            }
            PeerEvent::PieceVerified {
                info_hash,
                piece_index,
                length,
            } => self.on_piece_verified(info_hash, piece_index, length),
            PeerEvent::HashFailed {
                info_hash,
                piece_index,
            } => {
                self.alerts.post(AlertKind::HashFailed {
                    info_hash,
                    piece_index,
                });
            }
            PeerEvent::BlockUploaded { info_hash, length } => {
                if let Some(task) = self.torrents.get(&info_hash) {
                    task.status
                        .send_modify(|status| status.bytes_uploaded += u64::from(length));
                }
            }
        }
    }

    /// Reaps finished connection tasks.
    pub(crate) async fn reap_peer_task(&mut self) -> bool {
        match self.peer_tasks.join_next().await {
            Some(Err(e)) if e.is_panic() => {
                tracing::error!("Peer task panicked: {}", e);
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    pub(crate) fn has_peer_tasks(&self) -> bool {
        !self.peer_tasks.is_empty()
    }

    /// Tears the session down: listener first, then every connection.
    ///
    /// Transfer handles keep their last published status.
    pub(crate) async fn shutdown(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
            let _ = listener.await;
        }
        self.peer_tasks.shutdown().await;
        for task in self.torrents.values() {
            task.active.send_replace(false);
            task.status.send_modify(|status| {
                status.paused = true;
                status.peers = 0;
            });
        }
        self.torrents.clear();
        self.order.clear();
        self.alerts.post(AlertKind::SessionStopped);
    }

    fn peer_context(&self, info_hash: InfoHash) -> Result<PeerContext, TorrentError> {
        let task = self
            .torrents
            .get(&info_hash)
            .ok_or(TorrentError::TorrentNotFound { info_hash })?;
        Ok(PeerContext {
            info_hash,
            metadata: task.metadata.clone(),
            store: task.store.clone(),
            active: task.active.subscribe(),
            events: self.events.clone(),
            block_size: self.config.torrent.block_size,
            max_outstanding: self.config.torrent.max_outstanding_requests,
        })
    }

    fn on_piece_verified(&mut self, info_hash: InfoHash, piece_index: PieceIndex, length: u32) {
        let Some(task) = self.torrents.get(&info_hash) else {
            return;
        };

        let pieces_complete = task.store.completed_count();
        let finished = pieces_complete == task.metadata.piece_count();
        let mut newly_seeding = false;
        task.status.send_modify(|status| {
            status.pieces_complete = pieces_complete;
            status.bytes_downloaded += u64::from(length);
            if finished && !status.is_seeding {
                status.is_seeding = true;
                newly_seeding = true;
            }
        });

        self.alerts.post(AlertKind::PieceFinished {
            info_hash,
            piece_index,
        });
        if newly_seeding {
            tracing::info!("Torrent {} finished, now seeding", info_hash);
            self.alerts.post(AlertKind::TorrentFinished { info_hash });
            self.apply_queue_policy();
        }
    }

    fn transition(&mut self, info_hash: InfoHash, is_active: bool) {
        let Some(task) = self.torrents.get(&info_hash) else {
            return;
        };
        if task.is_active() == is_active {
            return;
        }

        task.active.send_replace(is_active);
        task.status.send_modify(|status| status.paused = !is_active);
        if is_active {
            tracing::debug!("Resumed torrent {}", info_hash);
            self.alerts.post(AlertKind::TorrentResumed { info_hash });
        } else {
            tracing::debug!("Paused torrent {}", info_hash);
            self.alerts.post(AlertKind::TorrentPaused { info_hash });
        }
    }

    /// Starts or pauses auto-managed tasks so that at most `active_limit`
    /// downloading tasks run at once. Seeding tasks always run.
    fn apply_queue_policy(&mut self) {
        let slots: Vec<QueueSlot> = self
            .order
            .iter()
            .filter_map(|info_hash| {
                let task = self.torrents.get(info_hash)?;
                task.auto_managed.then(|| QueueSlot {
                    info_hash: *info_hash,
                    is_seeding: task.is_seeding(),
                    is_active: task.is_active(),
                })
            })
            .collect();

        for (info_hash, is_active) in queue_decisions(&slots, self.config.torrent.active_limit) {
            self.transition(info_hash, is_active);
        }
    }
}

/// Queue-relevant view of an auto-managed task.
#[derive(Debug, Clone, Copy)]
struct QueueSlot {
    info_hash: InfoHash,
    is_seeding: bool,
    is_active: bool,
}

/// Returns the state changes needed to honour `active_limit`, oldest tasks first.
fn queue_decisions(slots: &[QueueSlot], active_limit: usize) -> Vec<(InfoHash, bool)> {
    let mut downloading = 0;
    slots
        .iter()
        .filter_map(|slot| {
            let wanted = if slot.is_seeding {
                true
            } else {
                downloading += 1;
                downloading <= active_limit
            };
            (wanted != slot.is_active).then_some((slot.info_hash, wanted))
        })
        .collect()
}

async fn accept_loop(listener: TcpListener, events: mpsc::UnboundedSender<PeerEvent>) {
    accept_connections(|| listener.accept(), events).await;
}

/// Forwards accepted connections until the session stops listening.
///
/// A failed accept (e.g. descriptor exhaustion) backs off before retrying.
async fn accept_connections<F, Fut>(mut accept: F, events: mpsc::UnboundedSender<PeerEvent>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<(TcpStream, SocketAddr)>>,
{
    loop {
        match accept().await {
            Ok((stream, address)) => {
                tracing::debug!("Accepted connection from {}", address);
                if events.send(PeerEvent::Accepted { stream, address }).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}
