//! Content descriptor shared by every transfer task of one torrent

use sha1::{Digest, Sha1};

use super::{InfoHash, PieceIndex, TorrentError};

/// Complete metadata describing a single-file torrent.
///
/// Immutable once built. Both sides of a transfer hold the same value
/// behind an `Arc`, so piece geometry and hashes always agree.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentMetadata {
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub total_length: u64,
}

impl TorrentMetadata {
    /// Returns the number of pieces.
    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    /// Returns the length of the final piece, which may be shorter than
    /// `piece_length`.
    pub fn last_piece_length(&self) -> u32 {
        let full_pieces = u64::from(self.piece_count().saturating_sub(1));
        (self.total_length - full_pieces * u64::from(self.piece_length)) as u32
    }

    /// Returns the byte length of the given piece.
    ///
    /// # Errors
    /// - `TorrentError::InvalidPieceIndex` - Index beyond the last piece
    pub fn piece_size(&self, index: PieceIndex) -> Result<u32, TorrentError> {
        let piece_count = self.piece_count();
        match index.as_u32() {
            i if i >= piece_count => Err(TorrentError::InvalidPieceIndex { index, piece_count }),
            i if i + 1 == piece_count => Ok(self.last_piece_length()),
            _ => Ok(self.piece_length),
        }
    }

    /// Returns the byte offset of a piece within the content.
    pub fn piece_offset(&self, index: PieceIndex) -> u64 {
        u64::from(index.as_u32()) * u64::from(self.piece_length)
    }

    /// Checks piece data against the expected SHA-1 hash.
    pub fn verify_piece(&self, index: PieceIndex, data: &[u8]) -> bool {
        let Some(expected) = self.piece_hashes.get(index.as_u32() as usize) else {
            return false;
        };
        let digest = Sha1::digest(data);
        digest.as_slice() == expected
    }

    /// Validates the piece geometry invariants.
    ///
    /// Total length must equal the sum of piece lengths, with every piece but
    /// the last exactly `piece_length` bytes long.
    ///
    /// # Errors
    /// - `TorrentError::InvalidTorrentFile` - Geometry does not add up
    pub fn validate(&self) -> Result<(), TorrentError> {
        if self.piece_length == 0 {
            return Err(TorrentError::InvalidTorrentFile {
                reason: "Piece length must be positive".to_string(),
            });
        }
        if self.piece_hashes.is_empty() {
            return Err(TorrentError::InvalidTorrentFile {
                reason: "Torrent has no pieces".to_string(),
            });
        }

        let piece_length = u64::from(self.piece_length);
        let full_pieces = self.piece_hashes.len() as u64 - 1;
        let lower = full_pieces * piece_length;
        let upper = lower + piece_length;
        if self.total_length <= lower || self.total_length > upper {
            return Err(TorrentError::InvalidTorrentFile {
                reason: format!(
                    "Total length {} inconsistent with {} pieces of {} bytes",
                    self.total_length,
                    self.piece_hashes.len(),
                    self.piece_length
                ),
            });
        }

        Ok(())
    }

    /// Describes the first disagreement with another descriptor, if any.
    pub fn mismatch(&self, other: &TorrentMetadata) -> Option<String> {
        if self.info_hash != other.info_hash {
            return Some(format!(
                "info hash {} != {}",
                self.info_hash, other.info_hash
            ));
        }
        if self.piece_count() != other.piece_count() {
            return Some(format!(
                "piece count {} != {}",
                self.piece_count(),
                other.piece_count()
            ));
        }
        if self.piece_length != other.piece_length || self.total_length != other.total_length {
            return Some(format!(
                "geometry {}x{} != {}x{}",
                self.piece_length, self.total_length, other.piece_length, other.total_length
            ));
        }
        self.piece_hashes
            .iter()
            .zip(&other.piece_hashes)
            .position(|(a, b)| a != b)
            .map(|index| format!("hash of piece {index} differs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(piece_length: u32, total_length: u64, pieces: usize) -> TorrentMetadata {
        TorrentMetadata {
            info_hash: InfoHash::new([7u8; 20]),
            name: "content".to_string(),
            piece_length,
            piece_hashes: vec![[0u8; 20]; pieces],
            total_length,
        }
    }

    #[test]
    fn test_piece_sizes_with_short_last_piece() {
        let meta = metadata(100, 250, 3);

        assert!(meta.validate().is_ok());
        assert_eq!(meta.piece_size(PieceIndex::new(0)).unwrap(), 100);
        assert_eq!(meta.piece_size(PieceIndex::new(2)).unwrap(), 50);
        assert_eq!(meta.last_piece_length(), 50);
        assert_eq!(meta.piece_offset(PieceIndex::new(2)), 200);
        assert!(matches!(
            meta.piece_size(PieceIndex::new(3)),
            Err(TorrentError::InvalidPieceIndex { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        assert!(metadata(100, 300, 2).validate().is_err());
        assert!(metadata(100, 100, 2).validate().is_err());
        assert!(metadata(0, 0, 1).validate().is_err());
        assert!(metadata(100, 0, 0).validate().is_err());
        assert!(metadata(100, 200, 2).validate().is_ok());
    }

    #[test]
    fn test_verify_piece() {
        let data = vec![3u8; 64];
        let mut meta = metadata(64, 64, 1);
        meta.piece_hashes[0] = Sha1::digest(&data).into();

        assert!(meta.verify_piece(PieceIndex::new(0), &data));
        assert!(!meta.verify_piece(PieceIndex::new(0), &data[..63]));
        assert!(!meta.verify_piece(PieceIndex::new(1), &data));
    }

    #[test]
    fn test_mismatch_reports_first_difference() {
        let a = metadata(100, 200, 2);
        let mut b = a.clone();
        assert_eq!(a.mismatch(&b), None);

        b.piece_hashes[1] = [1u8; 20];
        assert_eq!(a.mismatch(&b).unwrap(), "hash of piece 1 differs");

        let c = metadata(100, 300, 3);
        assert!(a.mismatch(&c).unwrap().starts_with("piece count"));
    }
}
