//! Deterministic synthetic content and its descriptor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use seedcheck_core::{TorrentCreator, TorrentMetadata};

use crate::config::FixtureSpec;
use crate::error::{HarnessError, Result};

/// Content materialized on disk together with its descriptor.
///
/// The same [`FixtureSpec`] always yields bit-identical bytes and therefore
/// the same info hash.
#[derive(Debug, Clone)]
pub struct ContentFixture {
    metadata: Arc<TorrentMetadata>,
    content_path: PathBuf,
}

impl ContentFixture {
    /// Generates the content and writes it to `dir/<name>`.
    ///
    /// # Errors
    ///
    /// - `HarnessError::InvalidFixture` - If a fixture dimension is zero or oversized
    /// - `HarnessError::FixtureIo` - If the content file cannot be written
    pub async fn materialize(spec: &FixtureSpec, dir: &Path) -> Result<Self> {
        let (metadata, content) = Self::build(spec)?;
        let content_path = dir.join(&spec.name);

        tokio::fs::write(&content_path, &content)
            .await
            .map_err(|source| HarnessError::FixtureIo {
                path: content_path.clone(),
                source,
            })?;

        tracing::info!(
            "Wrote fixture {} ({} bytes, {} pieces of {}, info hash {})",
            content_path.display(),
            metadata.total_length,
            metadata.piece_count(),
            metadata.piece_length,
            metadata.info_hash
        );

        Ok(Self {
            metadata: Arc::new(metadata),
            content_path,
        })
    }

    /// Builds the descriptor and content bytes without touching storage.
    ///
    /// # Errors
    ///
    /// - `HarnessError::InvalidFixture` - If a fixture dimension is zero or oversized
    pub fn build(spec: &FixtureSpec) -> Result<(TorrentMetadata, Vec<u8>)> {
        validate(spec)?;

        let total_length =
            usize::try_from(spec.total_length()).map_err(|_| HarnessError::InvalidFixture {
                reason: format!("{} bytes do not fit in memory", spec.total_length()),
            })?;

        let mut content = vec![0u8; total_length];
        ChaCha8Rng::seed_from_u64(spec.seed).fill_bytes(&mut content);

        let metadata = TorrentCreator::with_piece_size(spec.piece_length)
            .create_from_bytes(&spec.name, &content)
            .map_err(|e| HarnessError::InvalidFixture {
                reason: e.to_string(),
            })?;

        Ok((metadata, content))
    }

    /// Shared descriptor for both endpoints.
    pub fn metadata(&self) -> &Arc<TorrentMetadata> {
        &self.metadata
    }

    pub fn content_path(&self) -> &Path {
        &self.content_path
    }
}

fn validate(spec: &FixtureSpec) -> Result<()> {
    if spec.piece_length == 0 {
        return Err(HarnessError::InvalidFixture {
            reason: "piece length must be positive".to_string(),
        });
    }
    if spec.piece_count == 0 {
        return Err(HarnessError::InvalidFixture {
            reason: "piece count must be positive".to_string(),
        });
    }
    if let Some(last) = spec.last_piece_length
        && (last == 0 || last > spec.piece_length)
    {
        return Err(HarnessError::InvalidFixture {
            reason: format!(
                "last piece length {last} outside 1..={}",
                spec.piece_length
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;

    fn small_spec(seed: u64) -> FixtureSpec {
        FixtureSpec {
            name: "content".to_string(),
            piece_length: 1024,
            piece_count: 5,
            last_piece_length: None,
            seed,
        }
    }

    #[test]
    fn test_same_spec_is_bit_identical() {
        let (first_meta, first) = ContentFixture::build(&small_spec(7)).unwrap();
        let (second_meta, second) = ContentFixture::build(&small_spec(7)).unwrap();

        assert_eq!(first, second);
        assert_eq!(first_meta.info_hash, second_meta.info_hash);
        assert_eq!(first_meta.piece_hashes, second_meta.piece_hashes);
    }

    #[test]
    fn test_seed_changes_content() {
        let (first_meta, first) = ContentFixture::build(&small_spec(1)).unwrap();
        let (second_meta, second) = ContentFixture::build(&small_spec(2)).unwrap();

        assert_ne!(first, second);
        assert_ne!(first_meta.info_hash, second_meta.info_hash);
    }

    #[test]
    fn test_rejects_zero_dimensions() {
        let zero_length = FixtureSpec {
            piece_length: 0,
            ..small_spec(0)
        };
        let zero_count = FixtureSpec {
            piece_count: 0,
            ..small_spec(0)
        };
        let oversized_last = FixtureSpec {
            last_piece_length: Some(2048),
            ..small_spec(0)
        };

        for spec in [zero_length, zero_count, oversized_last] {
            assert!(matches!(
                ContentFixture::build(&spec),
                Err(HarnessError::InvalidFixture { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_materialize_writes_content() {
        let dir = TempDir::new().unwrap();
        let spec = small_spec(9);

        let fixture = ContentFixture::materialize(&spec, dir.path()).await.unwrap();
        let written = tokio::fs::read(fixture.content_path()).await.unwrap();

        assert_eq!(written.len(), 5 * 1024);
        assert_eq!(fixture.metadata().total_length, 5 * 1024);
        assert_eq!(fixture.content_path(), dir.path().join("content"));
    }

    #[tokio::test]
    async fn test_materialize_reports_unwritable_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");

        let result = ContentFixture::materialize(&small_spec(0), &missing).await;
        assert!(matches!(result, Err(HarnessError::FixtureIo { .. })));
    }

    proptest! {
        #[test]
        fn prop_total_length_matches_piece_layout(
            piece_length in 1u32..2048,
            piece_count in 1u32..12,
            last_fraction in 0.0f64..1.0,
            short_last in any::<bool>(),
        ) {
            let last_piece_length = short_last
                .then(|| ((f64::from(piece_length) * last_fraction) as u32).clamp(1, piece_length));
            let spec = FixtureSpec {
                name: "prop".to_string(),
                piece_length,
                piece_count,
                last_piece_length,
                seed: 3,
            };

            let (metadata, content) = ContentFixture::build(&spec).unwrap();
            let last = metadata.last_piece_length();

            prop_assert!(last <= piece_length);
            prop_assert_eq!(metadata.piece_count(), piece_count);
            prop_assert_eq!(
                metadata.total_length,
                u64::from(piece_length) * u64::from(piece_count - 1) + u64::from(last)
            );
            prop_assert_eq!(content.len() as u64, metadata.total_length);
        }
    }
}
