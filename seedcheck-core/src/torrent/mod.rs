//! BitTorrent primitives used by the transfer engine

pub mod creation;
pub mod metadata;
pub mod piece_store;
pub mod protocol;

use std::fmt;

pub use creation::{DEFAULT_PIECE_SIZE, TorrentCreator};
pub use metadata::TorrentMetadata;
pub use piece_store::{FilePieceStore, PieceStore, StorageMode};
pub use protocol::{BitTorrentPeerProtocol, PeerConnection, PeerHandshake, PeerId, PeerMessage};

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary from a torrent file.
/// Used to uniquely identify torrents across the BitTorrent network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Zero-based index of a piece within a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur during torrent operations.
///
/// Covers all failure modes of the engine: metadata construction, peer
/// communication, piece verification and storage access.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("Failed to build torrent: {reason}")]
    InvalidTorrentFile { reason: String },

    #[error("Piece {index} hash mismatch")]
    PieceHashMismatch { index: PieceIndex },

    #[error("Peer connection error: {reason}")]
    PeerConnectionError { reason: String },

    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error("Torrent {info_hash} not found")]
    TorrentNotFound { info_hash: InfoHash },

    #[error("Torrent {info_hash} already added")]
    DuplicateTorrent { info_hash: InfoHash },

    #[error("Piece index {index} out of range (piece count {piece_count})")]
    InvalidPieceIndex { index: PieceIndex, piece_count: u32 },

    #[error("Engine session has shut down")]
    EngineShutdown,

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}
