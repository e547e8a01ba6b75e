//! Seedcheck Harness - two-peer transfer verification
//!
//! Drives a seeding and a downloading session through setup, a bounded
//! completion wait and overlapping teardown, reporting whether the leecher
//! became a seed before the deadline.

pub mod alert_waiter;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod fixture;
pub mod monitor;
pub mod orchestrator;
pub mod run;
pub mod scratch;
pub mod shutdown;

// Re-export main types for convenient access
pub use alert_waiter::AlertWaiter;
pub use config::{FixtureSpec, HarnessConfig, PollPolicy};
pub use endpoint::{EndpointState, PeerEndpoint};
pub use error::{HarnessError, Result};
pub use fixture::ContentFixture;
pub use monitor::{CompletionMonitor, MonitorReport, MonitorState, MonitorVerdict, next_state};
pub use orchestrator::{TransferOrchestrator, TransferPair};
pub use run::{RunOutcome, run_harness};
pub use scratch::ScratchDir;
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
