//! BitTorrent peer protocol over TCP: handshakes and framed message I/O

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use super::handshake::{HANDSHAKE_LEN, HandshakeCodec};
use super::messages::MessageCodec;
use super::types::{PeerHandshake, PeerId, PeerMessage};
use crate::torrent::TorrentError;

/// Largest frame accepted from a peer
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Establishes peer connections with BEP 3 handshakes.
///
/// Outbound connections send our handshake first; inbound connections read
/// the remote handshake first so the caller can pick the matching torrent.
#[derive(Debug, Clone)]
pub struct BitTorrentPeerProtocol {
    connect_timeout: Duration,
    handshake_timeout: Duration,
}

/// Handshaken connection split into independent read and write halves.
pub struct PeerConnection {
    pub address: SocketAddr,
    pub remote_peer_id: PeerId,
    pub reader: OwnedReadHalf,
    pub writer: OwnedWriteHalf,
}

impl BitTorrentPeerProtocol {
    /// Creates protocol helper with the given timeouts.
    pub fn new(connect_timeout: Duration, handshake_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            handshake_timeout,
        }
    }

    /// Connects to a peer and exchanges handshakes.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PeerConnectionError` - If TCP connect or handshake I/O failed
    /// - `TorrentError::ProtocolError` - If the remote handshake is invalid or for another torrent
    pub async fn connect(
        &self,
        address: SocketAddr,
        handshake: &PeerHandshake,
    ) -> Result<PeerConnection, TorrentError> {
        let mut stream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(address),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TorrentError::PeerConnectionError {
                    reason: format!("Failed to connect to {address}: {e}"),
                });
            }
            Err(_) => {
                return Err(TorrentError::PeerConnectionError {
                    reason: format!("Timed out connecting to {address}"),
                });
            }
        };

        self.write_handshake(&mut stream, handshake).await?;
        let remote = self.read_handshake(&mut stream).await?;
        if remote.info_hash != handshake.info_hash {
            return Err(TorrentError::ProtocolError {
                message: "Info hash mismatch in handshake".to_string(),
            });
        }

        Ok(PeerConnection::new(stream, address, remote.peer_id))
    }

    /// Reads the remote handshake from an accepted stream.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PeerConnectionError` - If the read timed out or failed
    /// - `TorrentError::ProtocolError` - If the handshake is malformed
    pub async fn read_handshake(&self, stream: &mut TcpStream) -> Result<PeerHandshake, TorrentError> {
        let mut buffer = [0u8; HANDSHAKE_LEN];
        match tokio::time::timeout(self.handshake_timeout, stream.read_exact(&mut buffer)).await {
            Ok(Ok(_)) => HandshakeCodec::deserialize_handshake(&buffer),
            Ok(Err(e)) => Err(TorrentError::PeerConnectionError {
                reason: format!("Failed to read handshake: {e}"),
            }),
            Err(_) => Err(TorrentError::PeerConnectionError {
                reason: "Timed out waiting for handshake".to_string(),
            }),
        }
    }

    /// Writes our handshake to the stream.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PeerConnectionError` - If the write failed
    pub async fn write_handshake(
        &self,
        stream: &mut TcpStream,
        handshake: &PeerHandshake,
    ) -> Result<(), TorrentError> {
        let data = HandshakeCodec::serialize_handshake(handshake);
        stream
            .write_all(&data)
            .await
            .map_err(|e| TorrentError::PeerConnectionError {
                reason: format!("Failed to send handshake: {e}"),
            })
    }
}

impl PeerConnection {
    /// Splits a handshaken stream into a connection.
    pub fn new(stream: TcpStream, address: SocketAddr, remote_peer_id: PeerId) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            address,
            remote_peer_id,
            reader,
            writer,
        }
    }
}

/// Reads the next message; `Ok(None)` on clean end of stream.
///
/// # Errors
///
/// - `TorrentError::PeerConnectionError` - If the read failed mid-frame
/// - `TorrentError::ProtocolError` - If the frame is oversized or malformed
pub async fn read_message<R>(reader: &mut R) -> Result<Option<PeerMessage>, TorrentError>
where
    R: AsyncRead + Unpin,
{
    let mut length_buf = [0u8; 4];
    match reader.read_exact(&mut length_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(TorrentError::PeerConnectionError {
                reason: format!("Failed to read message length: {e}"),
            });
        }
    }

    let length = u32::from_be_bytes(length_buf) as usize;
    if length > MAX_FRAME_LEN {
        return Err(TorrentError::ProtocolError {
            message: format!("Frame of {length} bytes exceeds limit"),
        });
    }

    let mut payload = vec![0u8; length];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| TorrentError::PeerConnectionError {
            reason: format!("Failed to read message payload: {e}"),
        })?;

    MessageCodec::deserialize_payload(&payload).map(Some)
}

/// Writes one framed message.
///
/// # Errors
///
/// - `TorrentError::PeerConnectionError` - If the write failed
pub async fn write_message<W>(writer: &mut W, message: &PeerMessage) -> Result<(), TorrentError>
where
    W: AsyncWrite + Unpin,
{
    let frame = MessageCodec::serialize_message(message);
    writer
        .write_all(&frame)
        .await
        .map_err(|e| TorrentError::PeerConnectionError {
            reason: format!("Failed to send message: {e}"),
        })
}
