//! # Shipsync Store
//!
//! Storage abstraction for the shipsync engine. Everything the engine
//! persists goes through the traits in [`traits`], so the orchestration
//! crates never see SQL.
//!
//! ## Key Types
//!
//! - [`RecordRepository`] - Local parent/child records and profile lookups
//! - [`SessionStore`] - Import session rows with the one-running-per-key rule
//! - [`ConfigStore`] - The single auto-sync configuration row
//! - [`RateLimitStore`] - Attempt windows keyed by `(action, identifier)`
//! - [`Store`] - Umbrella trait implemented by both backends
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use shipsync_store::{SqliteStore, SessionStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("shipsync.db").unwrap();
//!     let running = store.list_running_sessions().await.unwrap();
//!     println!("{} sessions still running", running.len());
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Unique running session**: `begin_session` refuses a second
//!   `in_progress` row for the same filter key and returns the holder.
//! - **Terminal sessions are frozen**: saving over a completed or failed
//!   row is an error.
//! - **Upserts key off external ids**: re-importing the same data updates
//!   rows in place instead of duplicating them.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    BeginResult, ConfigStore, DuplicateGroup, RateLimitStore, RecordRepository, SessionStore,
    Store,
};
