//! Error types for reconciliation.

use thiserror::Error;

use shipsync_core::RecordId;
use shipsync_store::StoreError;

/// Errors that stop a single check or repair.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The dangling parent id is already used by another record.
    #[error("cannot materialize parent {0}: id is taken")]
    IdTaken(RecordId),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
