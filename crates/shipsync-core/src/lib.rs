//! # Shipsync Core
//!
//! Pure data model for the shipsync synchronization engine: import sessions,
//! remote and local record shapes, reconciliation issues, and the retry and
//! rate-limit policies.
//!
//! This crate contains no I/O, no storage, no networking. Everything here is
//! plain data plus the deterministic rules that govern it, so the stateful
//! crates above can be tested against a fixed clock.
//!
//! ## Key Types
//!
//! - [`SyncSession`] - Progress and outcome of one bulk import run
//! - [`AutoSyncConfig`] - Operator knobs for status-triggered single-record sync
//! - [`RemoteRecord`] - A shipment as the external system reports it
//! - [`ReconciliationIssue`] - One broken invariant found by an audit
//! - [`RetryPolicy`] - Fixed-delay retry decision
//! - [`AttemptLog`] - Sliding-window attempt history with lockout

pub mod clock;
pub mod config;
pub mod error;
pub mod issue;
pub mod rate_limit;
pub mod record;
pub mod retry;
pub mod session;
pub mod types;

/// Tracing target for failures that need operator attention.
pub const MONITORING_TARGET: &str = "shipsync::monitoring";

pub use clock::now_millis;
pub use config::{AutoSyncConfig, AutoSyncConfigUpdate, MAX_RETRY_ATTEMPTS, MAX_RETRY_DELAY_SECONDS};
pub use error::CoreError;
pub use issue::{IssueKind, ReconciliationIssue, ReconciliationReport, Resolution};
pub use rate_limit::{Attempt, AttemptLog, RateLimitConfig, RateLimitDecision, RateLimitKey};
pub use record::{
    ChildFields, ChildRecord, ParentFields, ParentMatch, ParentRecord, ProfileRecord,
    RemoteCustomer, RemotePackage, RemoteRecord, UpsertOutcome,
};
pub use retry::{Retryable, RetryDecision, RetryPolicy};
pub use session::{SessionStatus, SyncSession, UnitOutcome, CANCELLED_REASON, INTERRUPTED_REASON};
pub use types::{ExternalId, FilterKey, RecordId, SessionId, StatusValue};
