//! Seedcheck Core - minimal two-peer BitTorrent transfer engine
//!
//! This crate provides the engine that the seedcheck harness drives: sessions
//! bound to a listen address, descriptor-bound transfer tasks, an alert queue
//! used as a wake signal, and shutdown tokens for overlapping teardown.

pub mod config;
pub mod engine;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::EngineConfig;
pub use engine::{
    AddTorrentParams, Alert, AlertKind, Session, SessionHandle, ShutdownToken, StorageMode, TransferFlags,
    TransferHandle, TransferStatus,
};
pub use torrent::{InfoHash, PieceIndex, TorrentCreator, TorrentError, TorrentMetadata};
