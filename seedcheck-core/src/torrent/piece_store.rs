//! Piece storage for a single transfer task
//!
//! Pieces live in one file named after the torrent inside the task's save
//! path. The store tracks which pieces are verified and only serves those.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::{PieceIndex, TorrentError, TorrentMetadata};

const ALLOCATION_CHUNK: usize = 65_536;

/// How unwritten regions of the content file are allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Set the file length only; the filesystem fills holes lazily
    #[default]
    Sparse,
    /// Write zeros over the whole file up front
    Full,
}

/// Abstract interface for piece storage and retrieval
///
/// Used by peer connections to serve blocks and persist verified pieces.
#[async_trait]
pub trait PieceStore: Send + Sync {
    /// Reads a block from a verified piece.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidPieceIndex` - If index out of range
    /// - `TorrentError::ProtocolError` - If piece not held or block out of bounds
    /// - `TorrentError::Io` - If storage access error
    async fn read_block(
        &self,
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    ) -> Result<Bytes, TorrentError>;

    /// Verifies and persists a complete piece.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PieceHashMismatch` - If data does not match the piece hash
    /// - `TorrentError::Io` - If storage access error
    async fn write_piece(&self, piece_index: PieceIndex, data: &[u8]) -> Result<(), TorrentError>;

    /// Checks if piece is verified and held locally
    fn has_piece(&self, piece_index: PieceIndex) -> bool;

    /// Returns the number of verified pieces
    fn completed_count(&self) -> u32;

    /// Returns one flag per piece, true when held
    fn have_map(&self) -> Vec<bool>;
}

/// File-backed piece store
pub struct FilePieceStore {
    metadata: Arc<TorrentMetadata>,
    path: PathBuf,
    file: Mutex<File>,
    have: RwLock<Vec<bool>>,
}

impl FilePieceStore {
    /// Opens or creates the content file under `save_path` and hash-checks it.
    ///
    /// Pieces already present and matching their hash are marked as held, so
    /// a save path pre-populated with the full content yields a complete store.
    ///
    /// # Errors
    ///
    /// - `TorrentError::Io` - If the directory or file cannot be created or read
    pub async fn open(
        save_path: &Path,
        metadata: Arc<TorrentMetadata>,
        mode: StorageMode,
    ) -> Result<Self, TorrentError> {
        tokio::fs::create_dir_all(save_path).await?;
        let path = save_path.join(&metadata.name);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;

        let existing_length = file.metadata().await?.len();
        if existing_length < metadata.total_length {
            allocate(&mut file, existing_length, metadata.total_length, mode).await?;
        }

        let piece_count = metadata.piece_count() as usize;
        let store = Self {
            metadata,
            path,
            file: Mutex::new(file),
            have: RwLock::new(vec![false; piece_count]),
        };
        store.check_existing().await?;

        tracing::debug!(
            "Opened piece store {} ({}/{} pieces present)",
            store.path.display(),
            store.completed_count(),
            piece_count
        );

        Ok(store)
    }

    /// Returns the path of the content file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Verifies every piece currently on disk
    async fn check_existing(&self) -> Result<(), TorrentError> {
        let mut file = self.file.lock().await;
        let mut buffer = Vec::with_capacity(self.metadata.piece_length as usize);

        for index in 0..self.metadata.piece_count() {
            let piece_index = PieceIndex::new(index);
            let size = self.metadata.piece_size(piece_index)? as usize;
            buffer.resize(size, 0);

            file.seek(SeekFrom::Start(self.metadata.piece_offset(piece_index)))
                .await?;
            file.read_exact(&mut buffer).await?;

            if self.metadata.verify_piece(piece_index, &buffer) {
                self.have.write()[index as usize] = true;
            }
        }

        Ok(())
    }
}

/// Grows the file to `total_length` according to the storage mode
async fn allocate(
    file: &mut File,
    from: u64,
    total_length: u64,
    mode: StorageMode,
) -> Result<(), TorrentError> {
    match mode {
        StorageMode::Sparse => file.set_len(total_length).await?,
        StorageMode::Full => {
            let zeros = vec![0u8; ALLOCATION_CHUNK];
            let mut position = from;
            file.seek(SeekFrom::Start(position)).await?;
            while position < total_length {
                let chunk = (total_length - position).min(ALLOCATION_CHUNK as u64) as usize;
                file.write_all(&zeros[..chunk]).await?;
                position += chunk as u64;
            }
            file.flush().await?;
        }
    }
    Ok(())
}

#[async_trait]
impl PieceStore for FilePieceStore {
    async fn read_block(
        &self,
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    ) -> Result<Bytes, TorrentError> {
        let piece_size = self.metadata.piece_size(piece_index)?;
        if !self.has_piece(piece_index) {
            return Err(TorrentError::ProtocolError {
                message: format!("Requested piece {piece_index} is not held"),
            });
        }
        if length == 0 || u64::from(offset) + u64::from(length) > u64::from(piece_size) {
            return Err(TorrentError::ProtocolError {
                message: format!(
                    "Block {offset}+{length} outside piece {piece_index} of {piece_size} bytes"
                ),
            });
        }

        let mut block = vec![0u8; length as usize];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(
            self.metadata.piece_offset(piece_index) + u64::from(offset),
        ))
        .await?;
        file.read_exact(&mut block).await?;

        Ok(Bytes::from(block))
    }

    async fn write_piece(&self, piece_index: PieceIndex, data: &[u8]) -> Result<(), TorrentError> {
        let piece_size = self.metadata.piece_size(piece_index)?;
        if data.len() != piece_size as usize || !self.metadata.verify_piece(piece_index, data) {
            return Err(TorrentError::PieceHashMismatch { index: piece_index });
        }

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(self.metadata.piece_offset(piece_index)))
            .await?;
        file.write_all(data).await?;
        file.flush().await?;
        drop(file);

        self.have.write()[piece_index.as_u32() as usize] = true;
        Ok(())
    }

    fn has_piece(&self, piece_index: PieceIndex) -> bool {
        self.have
            .read()
            .get(piece_index.as_u32() as usize)
            .copied()
            .unwrap_or(false)
    }

    fn completed_count(&self) -> u32 {
        self.have.read().iter().filter(|&&held| held).count() as u32
    }

    fn have_map(&self) -> Vec<bool> {
        self.have.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::TorrentCreator;

    fn sample_content() -> Vec<u8> {
        (0..2500u32).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_prepopulated_store_is_complete() {
        let dir = tempfile::tempdir().unwrap();
        let content = sample_content();
        let metadata = Arc::new(
            TorrentCreator::with_piece_size(1024)
                .create_from_bytes("content", &content)
                .unwrap(),
        );
        std::fs::write(dir.path().join("content"), &content).unwrap();

        let store = FilePieceStore::open(dir.path(), metadata, StorageMode::Sparse)
            .await
            .unwrap();

        assert_eq!(store.completed_count(), 3);
        let block = store.read_block(PieceIndex::new(2), 100, 352).await.unwrap();
        assert_eq!(&block[..], &content[2148..2500]);
    }

    #[tokio::test]
    async fn test_empty_store_accepts_verified_pieces() {
        let dir = tempfile::tempdir().unwrap();
        let content = sample_content();
        let metadata = Arc::new(
            TorrentCreator::with_piece_size(1024)
                .create_from_bytes("content", &content)
                .unwrap(),
        );

        let store = FilePieceStore::open(dir.path(), metadata, StorageMode::Full)
            .await
            .unwrap();
        assert_eq!(store.completed_count(), 0);
        assert_eq!(std::fs::metadata(store.path()).unwrap().len(), 2500);

        // Unheld pieces are never served
        assert!(store.read_block(PieceIndex::new(0), 0, 16).await.is_err());

        let bad = vec![0u8; 1024];
        assert!(matches!(
            store.write_piece(PieceIndex::new(0), &bad).await,
            Err(TorrentError::PieceHashMismatch { .. })
        ));

        store
            .write_piece(PieceIndex::new(0), &content[..1024])
            .await
            .unwrap();
        assert!(store.has_piece(PieceIndex::new(0)));
        assert_eq!(store.have_map(), vec![true, false, false]);
    }

    #[tokio::test]
    async fn test_rejects_out_of_bounds_block() {
        let dir = tempfile::tempdir().unwrap();
        let content = sample_content();
        let metadata = Arc::new(
            TorrentCreator::with_piece_size(1024)
                .create_from_bytes("content", &content)
                .unwrap(),
        );
        std::fs::write(dir.path().join("content"), &content).unwrap();

        let store = FilePieceStore::open(dir.path(), metadata, StorageMode::Sparse)
            .await
            .unwrap();

        assert!(store.read_block(PieceIndex::new(2), 400, 100).await.is_err());
        assert!(store.read_block(PieceIndex::new(3), 0, 1).await.is_err());
    }
}
