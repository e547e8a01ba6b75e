//! Pairs a seeder and a leecher endpoint against one content descriptor.

use std::path::Path;
use std::sync::Arc;

use seedcheck_core::{AddTorrentParams, TorrentMetadata, TransferFlags, TransferHandle};

use crate::endpoint::{EndpointState, PeerEndpoint};
use crate::error::{HarnessError, Result};

/// Transfer handles produced by a successful pairing.
#[derive(Debug, Clone)]
pub struct TransferPair {
    pub seeder: TransferHandle,
    pub leecher: TransferHandle,
}

/// Registers descriptor-bound tasks on both endpoints and starts the transfer.
#[derive(Debug, Clone)]
pub struct TransferOrchestrator {
    flags: TransferFlags,
    connect_peers: bool,
}

impl TransferOrchestrator {
    pub fn new(flags: TransferFlags) -> Self {
        Self {
            flags,
            connect_peers: true,
        }
    }

    /// Controls whether the leecher connects to the seeder.
    ///
    /// Disabling this leaves the leecher without a source, which guarantees
    /// the monitor times out.
    pub fn connect_peers(mut self, connect: bool) -> Self {
        self.connect_peers = connect;
        self
    }

    /// Pairs the endpoints.
    ///
    /// `seeder_dir` must already hold the content named by `descriptor`; the
    /// seeder's engine hash-checks it on registration. `leecher_dir` starts
    /// empty. Both tasks are resumed explicitly since the flags keep them
    /// from starting on their own. Both endpoints end up `Active`.
    ///
    /// # Errors
    ///
    /// - `HarnessError::InvalidTransition` - If either endpoint is not `Listening`
    /// - `HarnessError::SetupMismatch` - If the registered descriptors disagree
    /// - `HarnessError::Engine` - If the engine rejects a registration or command
    pub async fn pair(
        &self,
        seeder: &mut PeerEndpoint,
        leecher: &mut PeerEndpoint,
        descriptor: &Arc<TorrentMetadata>,
        seeder_dir: &Path,
        leecher_dir: &Path,
    ) -> Result<TransferPair> {
        for endpoint in [&*seeder, &*leecher] {
            if endpoint.state() != EndpointState::Listening {
                return Err(HarnessError::InvalidTransition {
                    label: endpoint.label().to_string(),
                    from: endpoint.state(),
                    to: EndpointState::Active,
                });
            }
        }

        let seed_handle = seeder
            .session()
            .add_torrent(AddTorrentParams {
                metadata: descriptor.clone(),
                save_path: seeder_dir.to_path_buf(),
                flags: self.flags,
            })
            .await?;
        let leech_handle = leecher
            .session()
            .add_torrent(AddTorrentParams {
                metadata: descriptor.clone(),
                save_path: leecher_dir.to_path_buf(),
                flags: self.flags,
            })
            .await?;

        check_descriptors(seed_handle.metadata(), leech_handle.metadata())?;

        let seeded = seed_handle.status();
        if !seeded.is_seeding {
            tracing::warn!(
                "{} holds only {}/{} pieces after hash check",
                seeder.label(),
                seeded.pieces_complete,
                seeded.piece_count
            );
        }

        let info_hash = descriptor.info_hash;
        if self.connect_peers {
            if let Some(address) = seeder.bound_address() {
                leecher.session().connect_peer(info_hash, address).await?;
                tracing::debug!("{} connecting to {} at {}", leecher.label(), seeder.label(), address);
            }
        } else {
            tracing::warn!("Peer connection disabled; {} has no source", leecher.label());
        }

        seeder.session().resume(info_hash).await?;
        leecher.session().resume(info_hash).await?;
        seeder.activate()?;
        leecher.activate()?;

        tracing::info!(
            "Paired {} and {} on {} ({} pieces)",
            seeder.label(),
            leecher.label(),
            info_hash,
            descriptor.piece_count()
        );

        Ok(TransferPair {
            seeder: seed_handle,
            leecher: leech_handle,
        })
    }
}

/// Fails with `SetupMismatch` if two descriptors disagree.
pub fn check_descriptors(seeder: &TorrentMetadata, leecher: &TorrentMetadata) -> Result<()> {
    match seeder.mismatch(leecher) {
        Some(reason) => Err(HarnessError::SetupMismatch { reason }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use seedcheck_core::{StorageMode, TorrentCreator};
    use tempfile::TempDir;

    use super::*;

    fn descriptor(content: &[u8], piece_length: u32) -> TorrentMetadata {
        TorrentCreator::with_piece_size(piece_length)
            .create_from_bytes("temporary", content)
            .unwrap()
    }

    #[test]
    fn test_identical_descriptors_pass() {
        let metadata = descriptor(&[1u8; 4096], 1024);
        assert!(check_descriptors(&metadata, &metadata.clone()).is_ok());
    }

    #[test]
    fn test_piece_count_mismatch_detected() {
        let seeder = descriptor(&[1u8; 4096], 1024);
        let leecher = descriptor(&[1u8; 4096], 2048);

        assert!(matches!(
            check_descriptors(&seeder, &leecher),
            Err(HarnessError::SetupMismatch { .. })
        ));
    }

    #[test]
    fn test_hash_mismatch_detected() {
        let seeder = descriptor(&[1u8; 4096], 1024);
        let leecher = descriptor(&[2u8; 4096], 1024);

        assert!(matches!(
            check_descriptors(&seeder, &leecher),
            Err(HarnessError::SetupMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_pair_requires_listening_endpoints() {
        let dir = TempDir::new().unwrap();
        let address = "127.0.0.1:0".parse().unwrap();
        let mut seeder = PeerEndpoint::create("ses1", address);
        let mut leecher = PeerEndpoint::create("ses2", address);
        let metadata = Arc::new(descriptor(&[1u8; 4096], 1024));

        let result = TransferOrchestrator::new(TransferFlags::manual(StorageMode::Sparse))
            .pair(&mut seeder, &mut leecher, &metadata, dir.path(), dir.path())
            .await;
        assert!(matches!(result, Err(HarnessError::InvalidTransition { .. })));

        seeder.begin_abort().unwrap().join().await.unwrap();
        leecher.begin_abort().unwrap().join().await.unwrap();
    }

    #[tokio::test]
    async fn test_pair_activates_both_endpoints() {
        let dir = TempDir::new().unwrap();
        let content = vec![3u8; 4096];
        let metadata = Arc::new(descriptor(&content, 1024));
        let seeder_dir = dir.path().join("tmp1");
        tokio::fs::create_dir_all(&seeder_dir).await.unwrap();
        tokio::fs::write(seeder_dir.join("temporary"), &content)
            .await
            .unwrap();

        let address = "127.0.0.1:0".parse().unwrap();
        let mut seeder = PeerEndpoint::create("ses1", address);
        let mut leecher = PeerEndpoint::create("ses2", address);
        seeder
            .wait_until_listening(Duration::from_secs(5))
            .await
            .unwrap();
        leecher
            .wait_until_listening(Duration::from_secs(5))
            .await
            .unwrap();

        let pair = TransferOrchestrator::new(TransferFlags::manual(StorageMode::Full))
            .pair(
                &mut seeder,
                &mut leecher,
                &metadata,
                &seeder_dir,
                &dir.path().join("tmp2"),
            )
            .await
            .unwrap();

        assert_eq!(seeder.state(), EndpointState::Active);
        assert_eq!(leecher.state(), EndpointState::Active);
        assert!(pair.seeder.status().is_seeding);
        assert!(Arc::ptr_eq(pair.seeder.metadata(), pair.leecher.metadata()));

        seeder.begin_abort().unwrap().join().await.unwrap();
        leecher.begin_abort().unwrap().join().await.unwrap();
    }
}
