//! End-to-end harness run: fixture, pairing, monitoring and teardown.

use crate::config::HarnessConfig;
use crate::endpoint::PeerEndpoint;
use crate::error::Result;
use crate::fixture::ContentFixture;
use crate::monitor::{CompletionMonitor, MonitorReport, MonitorVerdict};
use crate::orchestrator::{TransferOrchestrator, TransferPair};
use crate::scratch::ScratchDir;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};

/// Result of a run that got past setup.
#[derive(Debug)]
pub struct RunOutcome {
    pub monitor: MonitorReport,
    pub shutdown: ShutdownReport,
}

impl RunOutcome {
    /// Process exit code: 0 when the leecher seeded, 1 when it did not.
    pub fn exit_code(&self) -> u8 {
        match self.monitor.verdict {
            MonitorVerdict::Success => 0,
            MonitorVerdict::TimedOut => 1,
        }
    }
}

/// Runs the harness once.
///
/// Both scratch directories are removed on every exit path, and both sessions
/// are shut down whether setup, monitoring or neither failed.
///
/// # Errors
///
/// Any fatal setup error: `FixtureIo`, `InvalidFixture`, `ListenTimeout`,
/// `ListenFailed`, `SetupMismatch`, `InvalidTransition` or `Engine`. A missed
/// deadline is reported through [`RunOutcome::exit_code`], not as an error.
pub async fn run_harness(config: &HarnessConfig) -> Result<RunOutcome> {
    let seeder_dir = ScratchDir::acquire(config.seeder_dir())?;
    let leecher_dir = ScratchDir::acquire(config.leecher_dir())?;

    let fixture = ContentFixture::materialize(&config.fixture, seeder_dir.path()).await?;

    let mut seeder = PeerEndpoint::create("ses1", config.seeder_address);
    let mut leecher = PeerEndpoint::create("ses2", config.leecher_address);

    let paired = pair_endpoints(
        config,
        &mut seeder,
        &mut leecher,
        &fixture,
        &seeder_dir,
        &leecher_dir,
    )
    .await;

    let pair = match paired {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!("Setup failed: {}", e);
            ShutdownCoordinator::shutdown(&mut [&mut seeder, &mut leecher]).await;
            return Err(e);
        }
    };

    let monitor = CompletionMonitor::new(config.poll)
        .run(&pair, leecher.session())
        .await;

    let shutdown = ShutdownCoordinator::shutdown(&mut [&mut seeder, &mut leecher]).await;

    seeder_dir.release();
    leecher_dir.release();

    Ok(RunOutcome { monitor, shutdown })
}

async fn pair_endpoints(
    config: &HarnessConfig,
    seeder: &mut PeerEndpoint,
    leecher: &mut PeerEndpoint,
    fixture: &ContentFixture,
    seeder_dir: &ScratchDir,
    leecher_dir: &ScratchDir,
) -> Result<TransferPair> {
    seeder.wait_until_listening(config.listen_timeout).await?;
    leecher.wait_until_listening(config.listen_timeout).await?;

    TransferOrchestrator::new(config.flags)
        .connect_peers(config.connect_peers)
        .pair(
            seeder,
            leecher,
            fixture.metadata(),
            seeder_dir.path(),
            leecher_dir.path(),
        )
        .await
}
