//! Error types for the Engine.

use shipsync_core::CoreError;
use shipsync_store::StoreError;
use shipsync_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during Engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Invalid state or settings value.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Engine configuration could not be parsed or is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether a session start was refused because one is already running.
    pub fn is_session_conflict(&self) -> bool {
        matches!(self, EngineError::Sync(SyncError::SessionConflict { .. }))
    }
}

/// Result type for Engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
