//! Per-connection peer wire task: bitfield exchange, sequential block
//! requests, piece assembly and serving.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use super::commands::PeerEvent;
use crate::config::MAX_BLOCK_SIZE;
use crate::torrent::protocol::{bitfield_to_have, read_message, write_message};
use crate::torrent::{
    BitTorrentPeerProtocol, FilePieceStore, InfoHash, PeerConnection, PeerHandshake, PeerMessage,
    PieceIndex, PieceStore, TorrentError, TorrentMetadata,
};

/// Inbound messages buffered between the socket reader and the wire state
const INBOUND_QUEUE: usize = 64;

/// Everything a connection task needs from its owning transfer task.
#[derive(Clone)]
pub(crate) struct PeerContext {
    pub info_hash: InfoHash,
    pub metadata: Arc<TorrentMetadata>,
    pub store: Arc<FilePieceStore>,
    pub active: watch::Receiver<bool>,
    pub events: mpsc::UnboundedSender<PeerEvent>,
    pub block_size: u32,
    pub max_outstanding: usize,
}

/// Connects to `address`, then runs the connection until it closes.
pub(crate) async fn run_outbound(
    protocol: BitTorrentPeerProtocol,
    address: SocketAddr,
    handshake: PeerHandshake,
    context: PeerContext,
) {
    match protocol.connect(address, &handshake).await {
        Ok(connection) => run_connection(connection, context).await,
        Err(e) => {
            tracing::warn!("Outbound connection to {} failed: {}", address, e);
            let _ = context.events.send(PeerEvent::ConnectFailed {
                info_hash: context.info_hash,
                address,
                reason: e.to_string(),
            });
        }
    }
}

/// Answers an inbound handshake already read by the listener, then runs the connection.
pub(crate) async fn run_inbound(
    protocol: BitTorrentPeerProtocol,
    mut stream: TcpStream,
    address: SocketAddr,
    remote: PeerHandshake,
    handshake: PeerHandshake,
    context: PeerContext,
) {
    if let Err(e) = protocol.write_handshake(&mut stream, &handshake).await {
        tracing::warn!("Inbound handshake with {} failed: {}", address, e);
        let _ = context.events.send(PeerEvent::ConnectFailed {
            info_hash: context.info_hash,
            address,
            reason: e.to_string(),
        });
        return;
    }

    let connection = PeerConnection::new(stream, address, remote.peer_id);
    run_connection(connection, context).await;
}

async fn run_connection(connection: PeerConnection, context: PeerContext) {
    let address = connection.address;
    let info_hash = context.info_hash;
    let events = context.events.clone();

    let _ = events.send(PeerEvent::Connected { info_hash, address });

    let reason = match drive(connection, context).await {
        Ok(()) => None,
        Err(e) => {
            tracing::debug!("Peer {} closed with error: {}", address, e);
            Some(e.to_string())
        }
    };

    let _ = events.send(PeerEvent::Disconnected {
        info_hash,
        address,
        reason,
    });
}

async fn drive(connection: PeerConnection, context: PeerContext) -> Result<(), TorrentError> {
    let PeerConnection {
        address,
        reader,
        writer,
        ..
    } = connection;

    let (inbound_tx, mut inbound) = mpsc::channel(INBOUND_QUEUE);
    let (outbound, outbound_rx) = mpsc::unbounded_channel();

    // Dropping the set aborts both halves when this connection ends
    let mut io_tasks = JoinSet::new();
    io_tasks.spawn(read_loop(reader, inbound_tx));
    io_tasks.spawn(write_loop(writer, outbound_rx));

    let mut active = context.active.clone();
    let mut wire = PeerWire::new(context, outbound);
    wire.send(PeerMessage::bitfield_from(&wire.context.store.have_map()))?;
    tracing::debug!("Peer {} connected for {}", address, wire.context.info_hash);

    loop {
        tokio::select! {
            message = inbound.recv() => match message {
                Some(Ok(message)) => wire.handle_message(message).await?,
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            },
            changed = active.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let is_active = *active.borrow_and_update();
                wire.on_active_changed(is_active)?;
            }
        }
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    inbound: mpsc::Sender<Result<PeerMessage, TorrentError>>,
) {
    loop {
        match read_message(&mut reader).await {
            Ok(Some(message)) => {
                if inbound.send(Ok(message)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = inbound.send(Err(e)).await;
                break;
            }
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<PeerMessage>) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = write_message(&mut writer, &message).await {
            tracing::debug!("Peer write failed: {}", e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// A piece being assembled from blocks.
struct PieceBuffer {
    data: Vec<u8>,
    next_offset: u32,
    received: u32,
}

/// Wire-level state of one connection.
struct PeerWire {
    context: PeerContext,
    outbound: mpsc::UnboundedSender<PeerMessage>,
    remote_have: Vec<bool>,
    am_choking: bool,
    am_interested: bool,
    peer_choking: bool,
    peer_interested: bool,
    downloading: BTreeMap<u32, PieceBuffer>,
    /// Requested length of each in-flight block, keyed by (piece, offset)
    outstanding: HashMap<(u32, u32), u32>,
}

impl PeerWire {
    fn new(context: PeerContext, outbound: mpsc::UnboundedSender<PeerMessage>) -> Self {
        let piece_count = context.metadata.piece_count() as usize;
        Self {
            context,
            outbound,
            remote_have: vec![false; piece_count],
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            downloading: BTreeMap::new(),
            outstanding: HashMap::new(),
        }
    }

    fn send(&self, message: PeerMessage) -> Result<(), TorrentError> {
        self.outbound
            .send(message)
            .map_err(|_| TorrentError::PeerConnectionError {
                reason: "Connection writer closed".to_string(),
            })
    }

    fn is_active(&self) -> bool {
        *self.context.active.borrow()
    }

    async fn handle_message(&mut self, message: PeerMessage) -> Result<(), TorrentError> {
        match message {
            PeerMessage::KeepAlive | PeerMessage::Cancel { .. } => {}
            PeerMessage::Choke => {
                self.peer_choking = true;
                // Unanswered requests are dropped by the remote on choke
                self.outstanding.clear();
                self.downloading.clear();
            }
            PeerMessage::Unchoke => {
                self.peer_choking = false;
                self.fill_requests()?;
            }
            PeerMessage::Interested => {
                self.peer_interested = true;
                if self.am_choking && self.is_active() {
                    self.am_choking = false;
                    self.send(PeerMessage::Unchoke)?;
                }
            }
            PeerMessage::NotInterested => {
                self.peer_interested = false;
            }
            PeerMessage::Have { piece_index } => {
                let slot = self
                    .remote_have
                    .get_mut(piece_index.as_u32() as usize)
                    .ok_or_else(|| TorrentError::ProtocolError {
                        message: format!("Have for unknown piece {piece_index}"),
                    })?;
                *slot = true;
                self.update_interest()?;
                self.fill_requests()?;
            }
            PeerMessage::Bitfield { bitfield } => {
                self.remote_have = bitfield_to_have(&bitfield, self.context.metadata.piece_count());
                self.update_interest()?;
                self.fill_requests()?;
            }
            PeerMessage::Request {
                piece_index,
                offset,
                length,
            } => self.serve_request(piece_index, offset, length).await?,
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => self.receive_block(piece_index, offset, &data).await?,
        }
        Ok(())
    }

    fn on_active_changed(&mut self, is_active: bool) -> Result<(), TorrentError> {
        if is_active {
            if self.am_choking && self.peer_interested {
                self.am_choking = false;
                self.send(PeerMessage::Unchoke)?;
            }
            self.fill_requests()
        } else {
            if !self.am_choking {
                self.am_choking = true;
                self.send(PeerMessage::Choke)?;
            }
            Ok(())
        }
    }

    fn update_interest(&mut self) -> Result<(), TorrentError> {
        let store = &self.context.store;
        let wanted = self
            .remote_have
            .iter()
            .enumerate()
            .any(|(index, &held)| held && !store.has_piece(PieceIndex::new(index as u32)));

        if wanted != self.am_interested {
            self.am_interested = wanted;
            self.send(if wanted {
                PeerMessage::Interested
            } else {
                PeerMessage::NotInterested
            })?;
        }
        Ok(())
    }

    /// Picks the lowest missing piece the remote holds.
    fn next_piece(&self) -> Option<u32> {
        self.remote_have
            .iter()
            .enumerate()
            .map(|(index, &held)| (index as u32, held))
            .find(|&(index, held)| {
                held && !self.downloading.contains_key(&index)
                    && !self.context.store.has_piece(PieceIndex::new(index))
            })
            .map(|(index, _)| index)
    }

    fn fill_requests(&mut self) -> Result<(), TorrentError> {
        if !self.is_active() || self.peer_choking || !self.am_interested {
            return Ok(());
        }

        while self.outstanding.len() < self.context.max_outstanding {
            let pending = self
                .downloading
                .iter()
                .find(|(_, buffer)| (buffer.next_offset as usize) < buffer.data.len())
                .map(|(&index, _)| index);

            let index = match pending {
                Some(index) => index,
                None => match self.next_piece() {
                    Some(index) => {
                        let size = self.context.metadata.piece_size(PieceIndex::new(index))?;
                        self.downloading.insert(
                            index,
                            PieceBuffer {
                                data: vec![0u8; size as usize],
                                next_offset: 0,
                                received: 0,
                            },
                        );
                        index
                    }
                    None => break,
                },
            };

            let Some(buffer) = self.downloading.get_mut(&index) else {
                break;
            };
            let offset = buffer.next_offset;
            let length = self
                .context
                .block_size
                .min(buffer.data.len() as u32 - offset);
            buffer.next_offset += length;

            self.outstanding.insert((index, offset), length);
            self.send(PeerMessage::Request {
                piece_index: PieceIndex::new(index),
                offset,
                length,
            })?;
        }
        Ok(())
    }

    async fn serve_request(
        &mut self,
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    ) -> Result<(), TorrentError> {
        if self.am_choking {
            tracing::trace!("Ignoring request for piece {} while choking", piece_index);
            return Ok(());
        }
        if length > MAX_BLOCK_SIZE {
            return Err(TorrentError::ProtocolError {
                message: format!("Request of {length} bytes exceeds block limit"),
            });
        }

        let data = self
            .context
            .store
            .read_block(piece_index, offset, length)
            .await?;
        self.send(PeerMessage::Piece {
            piece_index,
            offset,
            data,
        })?;
        let _ = self.context.events.send(PeerEvent::BlockUploaded {
            info_hash: self.context.info_hash,
            length,
        });
        Ok(())
    }

    async fn receive_block(
        &mut self,
        piece_index: PieceIndex,
        offset: u32,
        data: &[u8],
    ) -> Result<(), TorrentError> {
        let index = piece_index.as_u32();
        let Some(requested) = self.outstanding.remove(&(index, offset)) else {
            tracing::trace!("Discarding unrequested block {}+{}", piece_index, offset);
            return Ok(());
        };
        if data.len() != requested as usize {
            return Err(TorrentError::ProtocolError {
                message: format!(
                    "Block {piece_index}+{offset} carries {} bytes, requested {requested}",
                    data.len()
                ),
            });
        }

        let complete = {
            let Some(buffer) = self.downloading.get_mut(&index) else {
                return Ok(());
            };
            let start = offset as usize;
            let end = start + data.len();
            if end > buffer.data.len() {
                return Err(TorrentError::ProtocolError {
                    message: format!("Block {offset}+{} overruns piece {piece_index}", data.len()),
                });
            }
            buffer.data[start..end].copy_from_slice(data);
            buffer.received += data.len() as u32;
            buffer.received as usize >= buffer.data.len()
        };

        if complete && let Some(buffer) = self.downloading.remove(&index) {
            self.finish_piece(piece_index, buffer.data).await?;
        }

        self.fill_requests()
    }

    async fn finish_piece(&mut self, piece_index: PieceIndex, data: Vec<u8>) -> Result<(), TorrentError> {
        let info_hash = self.context.info_hash;
        match self.context.store.write_piece(piece_index, &data).await {
            Ok(()) => {
                tracing::debug!("Verified piece {} of {}", piece_index, info_hash);
                let _ = self.context.events.send(PeerEvent::PieceVerified {
                    info_hash,
                    piece_index,
                    length: data.len() as u32,
                });
                self.send(PeerMessage::Have { piece_index })?;
                self.update_interest()
            }
            Err(TorrentError::PieceHashMismatch { .. }) => {
                tracing::warn!("Piece {} of {} failed verification", piece_index, info_hash);
                let _ = self.context.events.send(PeerEvent::HashFailed {
                    info_hash,
                    piece_index,
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::torrent::{StorageMode, TorrentCreator};

    fn content() -> Vec<u8> {
        (0..40_000u32).map(|i| (i % 251) as u8).collect()
    }

    async fn context(
        dir: &TempDir,
        name: &str,
        prefill: bool,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> (PeerContext, watch::Sender<bool>) {
        let data = content();
        let metadata = Arc::new(
            TorrentCreator::with_piece_size(16384)
                .create_from_bytes("content.bin", &data)
                .unwrap(),
        );
        let save_path = dir.path().join(name);
        if prefill {
            tokio::fs::create_dir_all(&save_path).await.unwrap();
            tokio::fs::write(save_path.join("content.bin"), &data).await.unwrap();
        }
        let store = Arc::new(
            FilePieceStore::open(&save_path, metadata.clone(), StorageMode::Sparse)
                .await
                .unwrap(),
        );
        let (active_tx, active) = watch::channel(true);
        let context = PeerContext {
            info_hash: metadata.info_hash,
            metadata,
            store,
            active,
            events,
            block_size: 4096,
            max_outstanding: 4,
        };
        (context, active_tx)
    }

    #[tokio::test]
    async fn test_connection_pair_transfers_every_piece() {
        let dir = TempDir::new().unwrap();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (seeder, _seeder_active) = context(&dir, "seed", true, events_tx.clone()).await;
        let (leecher, _leecher_active) = context(&dir, "leech", false, events_tx).await;
        let leecher_store = leecher.store.clone();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let seeder_addr = listener.local_addr().unwrap();
        let connect = tokio::spawn(TcpStream::connect(seeder_addr));
        let (accepted, accepted_addr) = listener.accept().await.unwrap();
        let outbound = connect.await.unwrap().unwrap();

        let peer_id = crate::torrent::PeerId::new([7u8; 20]);
        tokio::spawn(run_connection(
            PeerConnection::new(accepted, accepted_addr, peer_id),
            seeder,
        ));
        tokio::spawn(run_connection(
            PeerConnection::new(outbound, seeder_addr, peer_id),
            leecher,
        ));

        let mut verified = 0;
        while verified < 3 {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("transfer stalled")
                .unwrap();
            if let PeerEvent::PieceVerified { .. } = event {
                verified += 1;
            }
        }

        assert_eq!(leecher_store.completed_count(), 3);
        let written = tokio::fs::read(leecher_store.path()).await.unwrap();
        assert_eq!(written, content());
    }

    #[tokio::test]
    async fn test_paused_leecher_sends_no_requests() {
        let dir = TempDir::new().unwrap();
        let (events_tx, _events) = mpsc::unbounded_channel();
        let (leecher, active_tx) = context(&dir, "leech", false, events_tx).await;
        active_tx.send(false).unwrap();

        let (outbound, mut sent) = mpsc::unbounded_channel();
        let mut wire = PeerWire::new(leecher, outbound);
        wire.handle_message(PeerMessage::Bitfield {
            bitfield: bytes::Bytes::from_static(&[0b1110_0000]),
        })
        .await
        .unwrap();
        wire.handle_message(PeerMessage::Unchoke).await.unwrap();

        assert_eq!(sent.try_recv().unwrap(), PeerMessage::Interested);
        assert!(sent.try_recv().is_err());

        active_tx.send(true).unwrap();
        wire.on_active_changed(true).unwrap();
        let requests: Vec<_> = std::iter::from_fn(|| sent.try_recv().ok()).collect();
        assert_eq!(requests.len(), 4);
        assert_eq!(
            requests[0],
            PeerMessage::Request {
                piece_index: PieceIndex::new(0),
                offset: 0,
                length: 4096,
            }
        );
    }

    #[tokio::test]
    async fn test_short_block_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (events_tx, _events) = mpsc::unbounded_channel();
        let (leecher, _active_tx) = context(&dir, "leech", false, events_tx).await;

        let (outbound, _sent) = mpsc::unbounded_channel();
        let mut wire = PeerWire::new(leecher, outbound);
        wire.handle_message(PeerMessage::Bitfield {
            bitfield: bytes::Bytes::from_static(&[0b1000_0000]),
        })
        .await
        .unwrap();
        wire.handle_message(PeerMessage::Unchoke).await.unwrap();
        assert_eq!(wire.outstanding.get(&(0, 0)), Some(&4096));

        let result = wire
            .handle_message(PeerMessage::Piece {
                piece_index: PieceIndex::new(0),
                offset: 0,
                data: bytes::Bytes::from(vec![0u8; 100]),
            })
            .await;
        assert!(matches!(result, Err(TorrentError::ProtocolError { .. })));
    }

    #[tokio::test]
    async fn test_paused_seeder_chokes_interested_peer() {
        let dir = TempDir::new().unwrap();
        let (events_tx, _events) = mpsc::unbounded_channel();
        let (seeder, active_tx) = context(&dir, "seed", true, events_tx).await;

        let (outbound, mut sent) = mpsc::unbounded_channel();
        let mut wire = PeerWire::new(seeder, outbound);
        wire.handle_message(PeerMessage::Interested).await.unwrap();
        assert_eq!(sent.try_recv().unwrap(), PeerMessage::Unchoke);

        active_tx.send(false).unwrap();
        wire.on_active_changed(false).unwrap();
        assert_eq!(sent.try_recv().unwrap(), PeerMessage::Choke);

        wire.handle_message(PeerMessage::Request {
            piece_index: PieceIndex::new(0),
            offset: 0,
            length: 4096,
        })
        .await
        .unwrap();
        assert!(sent.try_recv().is_err());
    }
}
