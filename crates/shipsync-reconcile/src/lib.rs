//! # Shipsync Reconcile
//!
//! Audits of the local store for damage left by partial or out-of-order
//! synchronization.
//!
//! ## Checks
//!
//! - **Orphans**: children whose parent reference resolves to nothing are
//!   repaired by materializing the parent, from a matching profile when one
//!   exists and as a low-confidence placeholder otherwise.
//! - **Duplicates**: parents collapsing to one external identity are flagged
//!   and left alone. Merging is a manual decision.
//!
//! The checks run independently; a failing check is reported in
//! [`ReconciliationReport::check_errors`](shipsync_core::ReconciliationReport)
//! without hiding the other's findings. Repairs converge: a second run right
//! after a fully repaired one reports nothing.

pub mod error;
pub mod service;

pub use error::{ReconcileError, Result};
pub use service::ReconciliationService;
