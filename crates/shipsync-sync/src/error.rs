//! Error types for the sync module.

use std::time::Duration;

use thiserror::Error;

use shipsync_core::{CoreError, ExternalId, FilterKey, RecordId, Retryable, SessionId};
use shipsync_store::StoreError;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote system could not be reached.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// A remote call exceeded its hard timeout.
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The remote system refused the request (validation, permission).
    #[error("remote rejected request: {0}")]
    RemoteRejected(String),

    /// A remote record could not be mapped to local records.
    #[error("cannot map {external_id}: {reason}")]
    Mapping {
        external_id: ExternalId,
        reason: String,
    },

    /// Another session already runs for the filter key.
    #[error("session {existing} already in progress for filter key {filter_key}")]
    SessionConflict {
        filter_key: FilterKey,
        existing: SessionId,
    },

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// A local record named by a status-change event does not exist.
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid state transition or configuration.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl SyncError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::RemoteRejected(message.into())
    }

    pub fn mapping(external_id: &ExternalId, reason: impl Into<String>) -> Self {
        Self::Mapping {
            external_id: external_id.clone(),
            reason: reason.into(),
        }
    }
}

impl Retryable for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteUnavailable(_) | Self::Timeout(_) => true,
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
