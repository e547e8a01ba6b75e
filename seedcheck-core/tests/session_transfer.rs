//! Integration tests for two-session transfers.
//!
//! These tests drive a seeding and a downloading session through the public
//! SessionHandle API over loopback TCP, including alert delivery and
//! overlapping teardown.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use seedcheck_core::engine::AlertKind;
use seedcheck_core::{
    AddTorrentParams, EngineConfig, Session, StorageMode, TorrentCreator, TorrentMetadata,
    TransferFlags, TransferHandle,
};
use tempfile::TempDir;

const PIECE_LENGTH: u32 = 32_768;

/// Test fixture holding a seeding and a downloading session.
struct TransferFixture {
    _dir: TempDir,
    content: Vec<u8>,
    seeder: Session,
    leecher: Session,
    seed_transfer: TransferHandle,
    leech_transfer: TransferHandle,
    leech_path: std::path::PathBuf,
}

impl TransferFixture {
    /// Creates both sessions with manual flags and a pre-populated seeder.
    async fn new(content_length: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let content: Vec<u8> = (0..content_length).map(|i| (i * 31 % 256) as u8).collect();
        let metadata = Arc::new(
            TorrentCreator::with_piece_size(PIECE_LENGTH)
                .create_from_bytes("payload.bin", &content)
                .unwrap(),
        );

        let seed_path = dir.path().join("seed");
        tokio::fs::create_dir_all(&seed_path).await.unwrap();
        tokio::fs::write(seed_path.join("payload.bin"), &content)
            .await
            .unwrap();
        let leech_path = dir.path().join("leech");

        let seeder = Session::spawn(EngineConfig::default());
        let leecher = Session::spawn(EngineConfig::default());

        let seed_transfer = add(&seeder, &metadata, &seed_path).await;
        let leech_transfer = add(&leecher, &metadata, &leech_path).await;

        Self {
            _dir: dir,
            content,
            seeder,
            leecher,
            seed_transfer,
            leech_transfer,
            leech_path,
        }
    }

    async fn connect_and_resume(&self) {
        let seeder_addr = listen_address(&self.seeder).await;
        let info_hash = self.leech_transfer.info_hash();

        self.leecher
            .handle()
            .connect_peer(info_hash, seeder_addr)
            .await
            .unwrap();
        self.seeder.handle().resume(info_hash).await.unwrap();
        self.leecher.handle().resume(info_hash).await.unwrap();
    }

    /// Waits for the leecher to report seeding, using alerts as a wake signal.
    async fn wait_for_leecher(&self, deadline: Duration) -> bool {
        let started = Instant::now();
        while started.elapsed() < deadline {
            if self.leech_transfer.status().is_seeding {
                return true;
            }
            self.leecher
                .handle()
                .wait_for_alert(Duration::from_millis(100))
                .await;
            self.leecher.handle().pop_alerts();
        }
        self.leech_transfer.status().is_seeding
    }
}

async fn add(session: &Session, metadata: &Arc<TorrentMetadata>, path: &Path) -> TransferHandle {
    session
        .handle()
        .add_torrent(AddTorrentParams {
            metadata: metadata.clone(),
            save_path: path.to_path_buf(),
            flags: TransferFlags::manual(StorageMode::Sparse),
        })
        .await
        .unwrap()
}

async fn listen_address(session: &Session) -> SocketAddr {
    for _ in 0..50 {
        if let Some(address) = session.handle().listen_address().await.unwrap() {
            return address;
        }
        session
            .handle()
            .wait_for_alert(Duration::from_millis(100))
            .await;
    }
    panic!("Session never started listening");
}

#[tokio::test]
async fn test_leecher_downloads_full_content() {
    let fixture = TransferFixture::new(13 * PIECE_LENGTH as usize).await;
    assert!(fixture.seed_transfer.status().is_seeding);
    assert!(!fixture.leech_transfer.status().is_seeding);

    fixture.connect_and_resume().await;
    assert!(fixture.wait_for_leecher(Duration::from_secs(10)).await);

    let status = fixture.leech_transfer.status();
    assert_eq!(status.pieces_complete, 13);
    assert_eq!(status.bytes_downloaded, fixture.content.len() as u64);

    let written = tokio::fs::read(fixture.leech_path.join("payload.bin"))
        .await
        .unwrap();
    assert_eq!(written, fixture.content);

    let seeder_token = fixture.seeder.abort();
    let leecher_token = fixture.leecher.abort();
    let (seeder_done, leecher_done) = tokio::join!(seeder_token.join(), leecher_token.join());
    seeder_done.unwrap();
    leecher_done.unwrap();
}

#[tokio::test]
async fn test_short_last_piece_transfers() {
    let fixture = TransferFixture::new(3 * PIECE_LENGTH as usize + 1000).await;

    fixture.connect_and_resume().await;
    assert!(fixture.wait_for_leecher(Duration::from_secs(10)).await);

    let written = tokio::fs::read(fixture.leech_path.join("payload.bin"))
        .await
        .unwrap();
    assert_eq!(written.len(), fixture.content.len());
    assert_eq!(written, fixture.content);

    let _ = fixture.seeder.abort().join().await;
    let _ = fixture.leecher.abort().join().await;
}

#[tokio::test]
async fn test_unconnected_leecher_never_finishes() {
    let fixture = TransferFixture::new(4 * PIECE_LENGTH as usize).await;
    let info_hash = fixture.leech_transfer.info_hash();
    fixture.leecher.handle().resume(info_hash).await.unwrap();

    assert!(!fixture.wait_for_leecher(Duration::from_millis(500)).await);
    assert_eq!(fixture.leech_transfer.status().pieces_complete, 0);

    let _ = fixture.seeder.abort().join().await;
    let _ = fixture.leecher.abort().join().await;
}

#[tokio::test]
async fn test_paused_seeder_withholds_content() {
    let fixture = TransferFixture::new(4 * PIECE_LENGTH as usize).await;
    let seeder_addr = listen_address(&fixture.seeder).await;
    let info_hash = fixture.leech_transfer.info_hash();

    fixture
        .leecher
        .handle()
        .connect_peer(info_hash, seeder_addr)
        .await
        .unwrap();
    fixture.leecher.handle().resume(info_hash).await.unwrap();

    assert!(!fixture.wait_for_leecher(Duration::from_millis(500)).await);

    fixture.seeder.handle().resume(info_hash).await.unwrap();
    assert!(fixture.wait_for_leecher(Duration::from_secs(10)).await);

    let _ = fixture.seeder.abort().join().await;
    let _ = fixture.leecher.abort().join().await;
}

#[tokio::test]
async fn test_overlapping_shutdown_posts_stop_alert() {
    let fixture = TransferFixture::new(2 * PIECE_LENGTH as usize).await;
    fixture.connect_and_resume().await;
    assert!(fixture.wait_for_leecher(Duration::from_secs(10)).await);

    let leecher_handle = fixture.leecher.handle().clone();
    let tokens = vec![fixture.seeder.abort(), fixture.leecher.abort()];
    let results = futures::future::join_all(tokens.into_iter().map(|token| token.join())).await;
    assert!(results.iter().all(Result::is_ok));

    let stopped = leecher_handle
        .pop_alerts()
        .into_iter()
        .any(|alert| alert.kind == AlertKind::SessionStopped);
    assert!(stopped);
    assert!(!leecher_handle.is_running());
    assert!(fixture.leech_transfer.status().is_seeding);
}

#[tokio::test]
async fn test_seeding_never_reverts_while_running() {
    let fixture = TransferFixture::new(3 * PIECE_LENGTH as usize).await;
    fixture.connect_and_resume().await;
    assert!(fixture.wait_for_leecher(Duration::from_secs(10)).await);

    let info_hash = fixture.leech_transfer.info_hash();
    let leecher = fixture.leecher.handle();
    for round in 0..6 {
        // Pausing and resuming posts alerts, so every wait wakes on real activity
        if round % 2 == 0 {
            leecher.pause(info_hash).await.unwrap();
        } else {
            leecher.resume(info_hash).await.unwrap();
        }
        leecher.wait_for_alert(Duration::from_millis(100)).await;
        leecher.pop_alerts();

        let status = fixture.leech_transfer.status();
        assert!(status.is_seeding, "seeding reverted in round {round}");
        assert_eq!(status.pieces_complete, 3);
        assert_eq!(status.progress(), 1.0);
        assert_eq!(status.paused, round % 2 == 0);
    }

    let _ = fixture.seeder.abort().join().await;
    let _ = fixture.leecher.abort().join().await;
}
