//! # Shipsync Sync
//!
//! Importing shipments from the external warehouse system.
//!
//! ## Overview
//!
//! Two paths write remote data into the local store, both through the same
//! [`Ingestor`]:
//!
//! - **Bulk sessions** ([`SyncSessionManager`]) page through everything
//!   listed under a filter key, persisting progress after every page.
//! - **Auto-sync** ([`AutoSyncTrigger`]) re-fetches a single shipment when a
//!   local record reaches a configured status.
//!
//! ## Key Properties
//!
//! - **Idempotent**: children upsert on their external id, parents on the
//!   customer's external id or a heuristic identity key
//! - **Exclusive**: one running session per filter key, conflicts fail fast
//! - **Bounded**: every remote call has a hard timeout and a fixed-delay
//!   retry budget
//! - **Isolated**: auto-sync never fails the write that triggered it
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shipsync_store::MemoryStore;
//! use shipsync_sync::{memory::MemorySource, RecordMapper, SessionConfig, SyncSessionManager};
//!
//! async fn example() {
//!     let store = Arc::new(MemoryStore::new());
//!     let source = Arc::new(MemorySource::default());
//!     let manager = SyncSessionManager::new(store, source, RecordMapper::default(), SessionConfig::default());
//!
//!     let id = manager.start("warehouse-1".into()).await.unwrap();
//!     let progress = manager.get_progress(&id).await.unwrap();
//!     println!("{:.0}% done, {} errors", progress.progress_percentage(), progress.error_count);
//! }
//! ```
//!
//! ## Monitoring
//!
//! Session aborts and failed auto-syncs are logged at `error` level under
//! the [`MONITORING_TARGET`] tracing target.

pub mod auto;
pub mod config;
pub mod error;
pub mod ingest;
pub mod mapper;
pub mod retry;
pub mod session;
pub mod settings;
pub mod source;

pub use shipsync_core::MONITORING_TARGET;

pub use auto::{AutoSyncOutcome, AutoSyncTrigger, Dispatch, SkipReason, StatusChangeEvent};
pub use config::{AutoSyncRuntimeConfig, SessionConfig};
pub use error::{Result, SyncError};
pub use ingest::{IngestOutcome, Ingestor};
pub use mapper::{MappedChild, MappedShipment, NameAddressMatcher, ParentMatcher, RecordMapper};
pub use retry::RetryExecutor;
pub use session::SyncSessionManager;
pub use settings::AutoSyncSettings;
pub use source::{memory, Page, RemoteSyncSource};
