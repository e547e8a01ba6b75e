//! BitTorrent wire protocol abstractions and message types.
//!
//! Handshake, framing and the BEP 3 message subset the engine speaks
//! between its two peers.

pub mod connection;
pub mod handshake;
pub mod messages;
pub mod types;

// Re-export public API
pub use connection::{BitTorrentPeerProtocol, PeerConnection, read_message, write_message};
pub use types::{PeerHandshake, PeerId, PeerMessage, bitfield_to_have};

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::handshake::HandshakeCodec;
    use super::messages::MessageCodec;
    use super::*;
    use crate::torrent::{InfoHash, PieceIndex};

    #[test]
    fn test_peer_id_generation() {
        let peer_id = PeerId::generate("-SC0001-");
        let bytes = peer_id.as_bytes();

        assert_eq!(&bytes[..8], b"-SC0001-");

        let peer_id2 = PeerId::generate("-SC0001-");
        assert_ne!(peer_id.as_bytes(), peer_id2.as_bytes());
    }

    #[test]
    fn test_handshake_serialization() {
        let info_hash = InfoHash::new([1u8; 20]);
        let peer_id = PeerId::new([2u8; 20]);
        let handshake = PeerHandshake::new(info_hash, peer_id);

        let serialized = HandshakeCodec::serialize_handshake(&handshake);
        assert_eq!(serialized.len(), 68);

        let deserialized = HandshakeCodec::deserialize_handshake(&serialized).unwrap();
        assert_eq!(handshake, deserialized);
    }

    #[test]
    fn test_handshake_rejects_foreign_protocol() {
        let mut serialized = HandshakeCodec::serialize_handshake(&PeerHandshake::new(
            InfoHash::new([1u8; 20]),
            PeerId::new([2u8; 20]),
        ));
        serialized[1] = b'X';

        assert!(HandshakeCodec::deserialize_handshake(&serialized).is_err());
        assert!(HandshakeCodec::deserialize_handshake(&serialized[..30]).is_err());
    }

    #[test]
    fn test_message_serialization() {
        let test_cases = vec![
            PeerMessage::KeepAlive,
            PeerMessage::Unchoke,
            PeerMessage::Interested,
            PeerMessage::Have {
                piece_index: PieceIndex::new(42),
            },
            PeerMessage::Request {
                piece_index: PieceIndex::new(10),
                offset: 16384,
                length: 16384,
            },
            PeerMessage::Cancel {
                piece_index: PieceIndex::new(10),
                offset: 0,
                length: 16384,
            },
            PeerMessage::Piece {
                piece_index: PieceIndex::new(0),
                offset: 0,
                data: Bytes::from(vec![1, 2, 3, 4, 5]),
            },
        ];

        for original_message in test_cases {
            let serialized = MessageCodec::serialize_message(&original_message);
            let deserialized = MessageCodec::deserialize_message(&serialized).unwrap();
            assert_eq!(original_message, deserialized);
        }
    }

    #[test]
    fn test_malformed_messages_rejected() {
        assert!(MessageCodec::deserialize_payload(&[4, 0, 0]).is_err());
        assert!(MessageCodec::deserialize_payload(&[6, 0, 0, 0, 1]).is_err());
        assert!(MessageCodec::deserialize_payload(&[1, 9]).is_err());
        assert!(MessageCodec::deserialize_payload(&[42]).is_err());
        assert!(MessageCodec::deserialize_message(&[0, 0, 0, 5, 4]).is_err());
    }

    #[test]
    fn test_bitfield_round_trip_clears_spare_bits() {
        let have = vec![true, false, true, true, false, false, false, false, true, true];
        let PeerMessage::Bitfield { bitfield } = PeerMessage::bitfield_from(&have) else {
            panic!("Expected bitfield message");
        };

        assert_eq!(&bitfield[..], &[0b1011_0000, 0b1100_0000]);
        assert_eq!(bitfield_to_have(&bitfield, 10), have);
    }

    #[tokio::test]
    async fn test_framed_read_write_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let message = PeerMessage::Have {
            piece_index: PieceIndex::new(7),
        };

        write_message(&mut client, &message).await.unwrap();
        drop(client);

        assert_eq!(read_message(&mut server).await.unwrap(), Some(message));
        assert_eq!(read_message(&mut server).await.unwrap(), None);
    }
}
