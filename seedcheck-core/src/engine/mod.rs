//! Actor-based session engine.
//!
//! A [`Session`] owns a listener, a set of descriptor-bound transfer tasks and
//! their peer connections. Callers drive it through a cloneable
//! [`SessionHandle`], observe it through the alert queue and per-task
//! [`TransferHandle`] snapshots, and stop it with [`Session::abort`].

mod actor;
pub mod alert;
pub mod commands;
mod core;
pub mod handle;
mod peer;
pub mod shutdown;

pub use alert::{Alert, AlertKind};
pub use commands::{AddTorrentParams, TransferFlags, TransferStatus};
pub use handle::{Session, SessionHandle, TransferHandle};
pub use shutdown::ShutdownToken;

pub use crate::torrent::StorageMode;
