//! # Shipsync
//!
//! The synchronization and reconciliation engine for shipment data imported
//! from an external warehouse system.
//!
//! ## Overview
//!
//! - **Bulk sessions**: paginated imports per filter key with persisted
//!   progress, fail-fast mutual exclusion and cancellation
//! - **Auto-sync**: best-effort single-record refresh when a local record
//!   reaches a configured status
//! - **Reconciliation**: audits repairing orphaned children and flagging
//!   duplicate parents
//! - **Rate limiting**: sliding-window lockout for sensitive operations
//!
//! ## Usage
//!
//! ```rust,no_run
//! use shipsync::{Engine, EngineConfig};
//! use shipsync::sync::memory::MemorySource;
//!
//! async fn example() {
//!     let engine = Engine::open("shipsync.db", MemorySource::default(), EngineConfig::default()).unwrap();
//!     engine.recover_interrupted().await.unwrap();
//!
//!     let id = engine.start_session("warehouse-1").await.unwrap();
//!     let progress = engine.get_progress(&id).await.unwrap();
//!     println!("{} of {} processed", progress.processed_units, progress.total_units);
//!
//!     let report = engine.run_reconciliation().await;
//!     println!("{} issues, {} fixed", report.issues.len(), report.fixed_count);
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `shipsync::core` - Data model and policies
//! - `shipsync::store` - Storage abstraction and SQLite
//! - `shipsync::sync` - Sessions, auto-sync and the remote source contract
//! - `shipsync::reconcile` - Reconciliation audits

pub mod config;
pub mod engine;
pub mod error;
pub mod rate_limit;

// Re-export component crates
pub use shipsync_core as core;
pub use shipsync_reconcile as reconcile;
pub use shipsync_store as store;
pub use shipsync_sync as sync;

// Re-export main types for convenience
pub use config::{EngineConfig, RateLimitSettings};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use rate_limit::RateLimiter;

// Re-export commonly used types
pub use shipsync_core::{
    AutoSyncConfig, AutoSyncConfigUpdate, RateLimitDecision, ReconciliationReport, SessionId,
    SessionStatus, SyncSession,
};
pub use shipsync_sync::{Dispatch, RemoteSyncSource, StatusChangeEvent};
