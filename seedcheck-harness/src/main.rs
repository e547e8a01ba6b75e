//! Seedcheck CLI - two-peer transfer verification
//!
//! Exits 0 when the leecher becomes a seed before the deadline, 1 when it
//! does not, and 2 when setup fails.

mod cli;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use seedcheck_core::tracing_setup::init_tracing;
use seedcheck_harness::{HarnessConfig, MonitorVerdict, RunOutcome, run_harness};

use crate::cli::Cli;

/// Exit code for fatal setup errors
const SETUP_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref()) {
        eprintln!("Failed to initialize tracing: {e}");
    }

    let config = cli.into_config();
    match run(&config).await {
        Ok(outcome) => {
            report(&outcome);
            ExitCode::from(outcome.exit_code())
        }
        Err(e) => {
            eprintln!("seedcheck: {e:#}");
            ExitCode::from(SETUP_FAILURE)
        }
    }
}

async fn run(config: &HarnessConfig) -> anyhow::Result<RunOutcome> {
    tracing::info!(
        "Verifying {} pieces of {} bytes between {} and {}",
        config.fixture.piece_count,
        config.fixture.piece_length,
        config.seeder_address,
        config.leecher_address
    );

    run_harness(config)
        .await
        .with_context(|| format!("Harness setup failed in {}", config.work_root.display()))
}

fn report(outcome: &RunOutcome) {
    let monitor = &outcome.monitor;
    match monitor.verdict {
        MonitorVerdict::Success => println!(
            "leecher seeding after {:.2?} ({} of {} pieces, {} iterations)",
            monitor.elapsed,
            monitor.leecher.pieces_complete,
            monitor.leecher.piece_count,
            monitor.iterations
        ),
        MonitorVerdict::TimedOut => eprintln!(
            "timeout: leecher is not seeding ({} of {} pieces after {:.2?})",
            monitor.leecher.pieces_complete,
            monitor.leecher.piece_count,
            monitor.elapsed
        ),
    }

    if !outcome.shutdown.is_clean() {
        eprintln!("warning: a session did not shut down cleanly");
    }
}
