//! BitTorrent handshake serialization and deserialization

use super::types::{PROTOCOL_NAME, PeerHandshake, PeerId};
use crate::torrent::{InfoHash, TorrentError};

/// Length of a standard handshake: 1 + 19 + 8 + 20 + 20
pub const HANDSHAKE_LEN: usize = 68;

/// Handshake serialization utilities for BitTorrent wire protocol.
pub struct HandshakeCodec;

impl HandshakeCodec {
    /// Serializes handshake message following BEP 3
    pub fn serialize_handshake(handshake: &PeerHandshake) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HANDSHAKE_LEN);
        buf.push(handshake.protocol.len() as u8);
        buf.extend_from_slice(handshake.protocol.as_bytes());
        buf.extend_from_slice(&handshake.reserved);
        buf.extend_from_slice(handshake.info_hash.as_bytes());
        buf.extend_from_slice(handshake.peer_id.as_bytes());
        buf
    }

    /// Deserializes handshake message following BEP 3
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Invalid length or unknown protocol string
    pub fn deserialize_handshake(data: &[u8]) -> Result<PeerHandshake, TorrentError> {
        let protocol_len = *data.first().ok_or_else(|| TorrentError::ProtocolError {
            message: "Empty handshake".to_string(),
        })? as usize;

        if data.len() < 1 + protocol_len + 8 + 20 + 20 {
            return Err(TorrentError::ProtocolError {
                message: format!("Handshake too short: {} bytes", data.len()),
            });
        }

        let protocol = String::from_utf8_lossy(&data[1..1 + protocol_len]).to_string();
        if protocol != PROTOCOL_NAME {
            return Err(TorrentError::ProtocolError {
                message: format!("Unsupported protocol {protocol:?}"),
            });
        }

        let mut cursor = 1 + protocol_len;
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[cursor..cursor + 8]);
        cursor += 8;

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[cursor..cursor + 20]);
        cursor += 20;

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[cursor..cursor + 20]);

        Ok(PeerHandshake {
            protocol,
            reserved,
            info_hash: InfoHash::new(info_hash),
            peer_id: PeerId::new(peer_id),
        })
    }
}
