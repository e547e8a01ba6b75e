//! Command and event definitions for the session actor model.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::oneshot;

use super::handle::TransferHandle;
use crate::torrent::{InfoHash, PeerHandshake, PieceIndex, StorageMode, TorrentError, TorrentMetadata};

/// Commands that can be sent to the session actor.
///
/// Each command encapsulates an operation request along with a response channel
/// for the actor to send back results.
pub enum SessionCommand {
    /// Register a descriptor-bound transfer task.
    AddTorrent {
        params: AddTorrentParams,
        responder: oneshot::Sender<Result<TransferHandle, TorrentError>>,
    },
    /// Open an outbound connection to a peer for a task.
    ConnectPeer {
        info_hash: InfoHash,
        address: SocketAddr,
        responder: oneshot::Sender<Result<(), TorrentError>>,
    },
    /// Start transferring a task.
    Resume {
        info_hash: InfoHash,
        responder: oneshot::Sender<Result<(), TorrentError>>,
    },
    /// Stop transferring a task.
    Pause {
        info_hash: InfoHash,
        responder: oneshot::Sender<Result<(), TorrentError>>,
    },
    /// Report the bound listen address, if any.
    ListenAddress {
        responder: oneshot::Sender<Option<SocketAddr>>,
    },
}

/// Internal notifications from the listener and peer connection tasks.
pub(crate) enum PeerEvent {
    /// The listener accepted a TCP connection.
    Accepted {
        stream: TcpStream,
        address: SocketAddr,
    },
    /// An inbound connection sent its handshake.
    InboundHandshake {
        stream: TcpStream,
        address: SocketAddr,
        handshake: PeerHandshake,
    },
    /// A peer connection finished its handshake.
    Connected {
        info_hash: InfoHash,
        address: SocketAddr,
    },
    /// A piece was verified and written.
    PieceVerified {
        info_hash: InfoHash,
        piece_index: PieceIndex,
        length: u32,
    },
    /// A downloaded piece failed verification.
    HashFailed {
        info_hash: InfoHash,
        piece_index: PieceIndex,
    },
    /// A block was sent to a peer.
    BlockUploaded { info_hash: InfoHash, length: u32 },
    /// A connection failed before its handshake completed.
    ConnectFailed {
        info_hash: InfoHash,
        address: SocketAddr,
        reason: String,
    },
    /// A handshaken peer connection ended.
    Disconnected {
        info_hash: InfoHash,
        address: SocketAddr,
        reason: Option<String>,
    },
}

/// Options recognised when registering a transfer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFlags {
    /// How unwritten regions of the content file are allocated
    pub storage_mode: StorageMode,
    /// Whether the task begins transferring immediately on registration
    pub auto_start: bool,
    /// Whether the engine may pause and resume the task under its queue policy
    pub auto_manage: bool,
}

impl Default for TransferFlags {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::Sparse,
            auto_start: true,
            auto_manage: true,
        }
    }
}

impl TransferFlags {
    /// Flags for externally controlled tasks: nothing starts or pauses on its own.
    pub fn manual(storage_mode: StorageMode) -> Self {
        Self {
            storage_mode,
            auto_start: false,
            auto_manage: false,
        }
    }
}

/// Parameters for registering a transfer task.
#[derive(Debug, Clone)]
pub struct AddTorrentParams {
    pub metadata: Arc<TorrentMetadata>,
    pub save_path: PathBuf,
    pub flags: TransferFlags,
}

/// Read-only snapshot of a transfer task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStatus {
    /// Every piece is held; never reverts once set
    pub is_seeding: bool,
    /// Number of verified pieces held
    pub pieces_complete: u32,
    /// Total number of pieces
    pub piece_count: u32,
    /// Whether the task is currently paused
    pub paused: bool,
    /// Payload bytes verified from peers
    pub bytes_downloaded: u64,
    /// Payload bytes served to peers
    pub bytes_uploaded: u64,
    /// Connected peers
    pub peers: usize,
}

impl TransferStatus {
    /// Fraction of pieces held, from 0.0 to 1.0.
    pub fn progress(&self) -> f32 {
        if self.piece_count == 0 {
            return 0.0;
        }
        self.pieces_complete as f32 / self.piece_count as f32
    }
}
