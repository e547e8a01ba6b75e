//! Core types for the BitTorrent wire protocol

use bytes::Bytes;

use crate::torrent::{InfoHash, PieceIndex};

/// Protocol identifier carried in every handshake
pub const PROTOCOL_NAME: &str = "BitTorrent protocol";

/// BitTorrent peer identifier.
///
/// 20-byte identifier exchanged in handshakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// Creates peer ID from 20-byte array.
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    /// Returns peer ID as byte array reference.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Generates a random peer ID carrying the given client prefix.
    ///
    /// The prefix is truncated to 8 bytes; the remainder is random.
    pub fn generate(client_id: &str) -> Self {
        let mut id = [0u8; 20];
        let prefix = &client_id.as_bytes()[..client_id.len().min(8)];
        id[..prefix.len()].copy_from_slice(prefix);
        for byte in &mut id[prefix.len()..] {
            *byte = rand::random();
        }
        Self(id)
    }
}

/// BitTorrent wire protocol messages (BEP 3 subset used by the engine).
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    /// Keep-alive message to maintain connection
    KeepAlive,
    /// Inform peer that we are choking them
    Choke,
    /// Inform peer that we are no longer choking them
    Unchoke,
    /// Inform peer that we are interested in their pieces
    Interested,
    /// Inform peer that we are not interested in their pieces
    NotInterested,
    /// Inform peer that we have acquired a specific piece
    Have { piece_index: PieceIndex },
    /// Send our complete piece availability bitmap
    Bitfield { bitfield: Bytes },
    /// Request a block of data from a piece
    Request {
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    },
    /// Send a block of piece data
    Piece {
        piece_index: PieceIndex,
        offset: u32,
        data: Bytes,
    },
    /// Cancel a previously sent request
    Cancel {
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    },
}

impl PeerMessage {
    /// Builds a bitfield message from a per-piece availability map.
    ///
    /// Spare bits in the final byte are left zero.
    pub fn bitfield_from(have: &[bool]) -> Self {
        let mut bitfield = vec![0u8; have.len().div_ceil(8)];
        for (index, _) in have.iter().enumerate().filter(|(_, held)| **held) {
            bitfield[index / 8] |= 0x80 >> (index % 8);
        }
        PeerMessage::Bitfield {
            bitfield: Bytes::from(bitfield),
        }
    }
}

/// Expands a bitfield payload into one flag per piece.
pub fn bitfield_to_have(bitfield: &[u8], piece_count: u32) -> Vec<bool> {
    (0..piece_count as usize)
        .map(|index| {
            bitfield
                .get(index / 8)
                .is_some_and(|byte| byte & (0x80 >> (index % 8)) != 0)
        })
        .collect()
}

/// Peer handshake information.
///
/// Initial exchange between peers to establish protocol compatibility
/// and verify info hash matching.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerHandshake {
    /// Protocol identifier string ("BitTorrent protocol")
    pub protocol: String,
    /// Reserved bytes for protocol extensions
    pub reserved: [u8; 8],
    /// Info hash of the torrent being shared
    pub info_hash: InfoHash,
    /// Unique identifier for the peer
    pub peer_id: PeerId,
}

impl PeerHandshake {
    /// Create handshake for BitTorrent protocol.
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }
}
