//! Torrent creation from in-memory content or local files
//!
//! Splits content into pieces, hashes each piece with SHA-1 and derives the
//! info hash, producing metadata ready for the wire protocol.

use std::path::Path;

use sha1::{Digest, Sha1};
use tokio::io::AsyncReadExt;

use super::{InfoHash, TorrentError, TorrentMetadata};

/// Default piece size for new torrents (32 KiB)
pub const DEFAULT_PIECE_SIZE: u32 = 32_768;

/// Torrent creator for converting content to torrent metadata
pub struct TorrentCreator {
    piece_size: u32,
}

impl Default for TorrentCreator {
    fn default() -> Self {
        Self::new()
    }
}

impl TorrentCreator {
    /// Creates torrent creator with default piece size (32 KiB)
    pub fn new() -> Self {
        Self {
            piece_size: DEFAULT_PIECE_SIZE,
        }
    }

    /// Creates torrent creator with custom piece size
    pub fn with_piece_size(piece_size: u32) -> Self {
        Self { piece_size }
    }

    /// Returns the configured piece size
    pub fn piece_size(&self) -> u32 {
        self.piece_size
    }

    /// Creates torrent metadata for content held in memory
    ///
    /// # Errors
    /// - `TorrentError::InvalidTorrentFile` - Empty content, zero piece size or invalid name
    pub fn create_from_bytes(
        &self,
        name: &str,
        content: &[u8],
    ) -> Result<TorrentMetadata, TorrentError> {
        if self.piece_size == 0 {
            return Err(TorrentError::InvalidTorrentFile {
                reason: "Piece size must be positive".to_string(),
            });
        }
        if content.is_empty() {
            return Err(TorrentError::InvalidTorrentFile {
                reason: "Cannot create torrent from empty content".to_string(),
            });
        }
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(TorrentError::InvalidTorrentFile {
                reason: format!("Invalid content name: {name:?}"),
            });
        }

        let piece_hashes: Vec<[u8; 20]> = content
            .chunks(self.piece_size as usize)
            .map(|piece| Sha1::digest(piece).into())
            .collect();

        let total_length = content.len() as u64;
        let info_hash = self.calculate_info_hash(name, total_length, &piece_hashes);

        Ok(TorrentMetadata {
            info_hash,
            name: name.to_string(),
            piece_length: self.piece_size,
            piece_hashes,
            total_length,
        })
    }

    /// Creates torrent metadata from a single file
    ///
    /// # Errors
    /// - `TorrentError::Io` - File read error or access denied
    /// - `TorrentError::InvalidTorrentFile` - Missing, empty or unnamed file
    pub async fn create_from_file(&self, file_path: &Path) -> Result<TorrentMetadata, TorrentError> {
        if !file_path.exists() {
            return Err(TorrentError::InvalidTorrentFile {
                reason: format!("File does not exist: {}", file_path.display()),
            });
        }

        let file_name = file_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| TorrentError::InvalidTorrentFile {
                reason: "Invalid filename".to_string(),
            })?
            .to_string();

        let mut file = tokio::fs::File::open(file_path).await?;
        let mut content = Vec::new();
        file.read_to_end(&mut content).await?;

        self.create_from_bytes(&file_name, &content)
    }

    /// Calculates info hash for single-file torrent
    fn calculate_info_hash(&self, name: &str, length: u64, piece_hashes: &[[u8; 20]]) -> InfoHash {
        // Info dictionary fields in bencode key order
        let mut info_dict = Vec::new();
        info_dict.push(b'd');
        info_dict.extend_from_slice(b"6:lengthi");
        info_dict.extend_from_slice(length.to_string().as_bytes());
        info_dict.extend_from_slice(b"e4:name");
        info_dict.extend_from_slice(name.len().to_string().as_bytes());
        info_dict.push(b':');
        info_dict.extend_from_slice(name.as_bytes());
        info_dict.extend_from_slice(b"12:piece lengthi");
        info_dict.extend_from_slice(self.piece_size.to_string().as_bytes());
        info_dict.extend_from_slice(b"e6:pieces");
        info_dict.extend_from_slice((piece_hashes.len() * 20).to_string().as_bytes());
        info_dict.push(b':');
        for hash in piece_hashes {
            info_dict.extend_from_slice(hash);
        }
        info_dict.push(b'e');

        InfoHash::new(Sha1::digest(&info_dict).into())
    }
}
