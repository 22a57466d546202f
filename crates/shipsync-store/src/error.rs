//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The backend is temporarily unable to serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Value serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Row not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Attempt to modify a row that is frozen (terminal session).
    #[error("immutable row: {0}")]
    Immutable(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::Io(_) => true,
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    pub(crate) fn task_failed(e: tokio::task::JoinError) -> Self {
        StoreError::Unavailable(format!("spawn_blocking failed: {e}"))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
