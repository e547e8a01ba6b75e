//! BitTorrent wire protocol message serialization and deserialization

use bytes::{Buf, BufMut, Bytes};

use super::types::PeerMessage;
use crate::torrent::{PieceIndex, TorrentError};

const CHOKE: u8 = 0;
const UNCHOKE: u8 = 1;
const INTERESTED: u8 = 2;
const NOT_INTERESTED: u8 = 3;
const HAVE: u8 = 4;
const BITFIELD: u8 = 5;
const REQUEST: u8 = 6;
const PIECE: u8 = 7;
const CANCEL: u8 = 8;

/// Message serialization utilities for BitTorrent wire protocol.
pub struct MessageCodec;

impl MessageCodec {
    /// Serializes peer message into a length-prefixed frame following BEP 3
    pub fn serialize_message(message: &PeerMessage) -> Vec<u8> {
        let mut buf = Vec::new();

        match message {
            PeerMessage::KeepAlive => buf.put_u32(0),
            PeerMessage::Choke => put_bare(&mut buf, CHOKE),
            PeerMessage::Unchoke => put_bare(&mut buf, UNCHOKE),
            PeerMessage::Interested => put_bare(&mut buf, INTERESTED),
            PeerMessage::NotInterested => put_bare(&mut buf, NOT_INTERESTED),
            PeerMessage::Have { piece_index } => {
                buf.put_u32(5);
                buf.put_u8(HAVE);
                buf.put_u32(piece_index.as_u32());
            }
            PeerMessage::Bitfield { bitfield } => {
                buf.put_u32(1 + bitfield.len() as u32);
                buf.put_u8(BITFIELD);
                buf.extend_from_slice(bitfield);
            }
            PeerMessage::Request {
                piece_index,
                offset,
                length,
            } => put_block_ref(&mut buf, REQUEST, *piece_index, *offset, *length),
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                buf.put_u32(9 + data.len() as u32);
                buf.put_u8(PIECE);
                buf.put_u32(piece_index.as_u32());
                buf.put_u32(*offset);
                buf.extend_from_slice(data);
            }
            PeerMessage::Cancel {
                piece_index,
                offset,
                length,
            } => put_block_ref(&mut buf, CANCEL, *piece_index, *offset, *length),
        }

        buf
    }

    /// Deserializes a complete length-prefixed frame following BEP 3
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Truncated frame or malformed payload
    pub fn deserialize_message(data: &[u8]) -> Result<PeerMessage, TorrentError> {
        if data.len() < 4 {
            return Err(protocol_error("Message too short"));
        }

        let mut buf = data;
        let length = buf.get_u32() as usize;
        if buf.len() < length {
            return Err(protocol_error("Incomplete message"));
        }

        Self::deserialize_payload(&buf[..length])
    }

    /// Deserializes a frame payload (message id and body, without the length prefix)
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Unknown id or wrong payload length
    pub fn deserialize_payload(payload: &[u8]) -> Result<PeerMessage, TorrentError> {
        let mut buf = payload;
        if !buf.has_remaining() {
            return Ok(PeerMessage::KeepAlive);
        }

        let message_id = buf.get_u8();
        match message_id {
            CHOKE | UNCHOKE | INTERESTED | NOT_INTERESTED if buf.has_remaining() => Err(
                protocol_error(&format!("Unexpected payload for message {message_id}")),
            ),
            CHOKE => Ok(PeerMessage::Choke),
            UNCHOKE => Ok(PeerMessage::Unchoke),
            INTERESTED => Ok(PeerMessage::Interested),
            NOT_INTERESTED => Ok(PeerMessage::NotInterested),
            HAVE => {
                if buf.remaining() != 4 {
                    return Err(protocol_error("Invalid Have message length"));
                }
                Ok(PeerMessage::Have {
                    piece_index: PieceIndex::new(buf.get_u32()),
                })
            }
            BITFIELD => Ok(PeerMessage::Bitfield {
                bitfield: Bytes::copy_from_slice(buf),
            }),
            REQUEST | CANCEL => {
                if buf.remaining() != 12 {
                    return Err(protocol_error("Invalid Request/Cancel message length"));
                }
                let piece_index = PieceIndex::new(buf.get_u32());
                let offset = buf.get_u32();
                let length = buf.get_u32();
                if message_id == REQUEST {
                    Ok(PeerMessage::Request {
                        piece_index,
                        offset,
                        length,
                    })
                } else {
                    Ok(PeerMessage::Cancel {
                        piece_index,
                        offset,
                        length,
                    })
                }
            }
            PIECE => {
                if buf.remaining() < 8 {
                    return Err(protocol_error("Invalid Piece message length"));
                }
                let piece_index = PieceIndex::new(buf.get_u32());
                let offset = buf.get_u32();
                Ok(PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: Bytes::copy_from_slice(buf),
                })
            }
            _ => Err(protocol_error(&format!("Unknown message ID: {message_id}"))),
        }
    }
}

fn put_bare(buf: &mut Vec<u8>, id: u8) {
    buf.put_u32(1);
    buf.put_u8(id);
}

fn put_block_ref(buf: &mut Vec<u8>, id: u8, piece_index: PieceIndex, offset: u32, length: u32) {
    buf.put_u32(13);
    buf.put_u8(id);
    buf.put_u32(piece_index.as_u32());
    buf.put_u32(offset);
    buf.put_u32(length);
}

fn protocol_error(message: &str) -> TorrentError {
    TorrentError::ProtocolError {
        message: message.to_string(),
    }
}
