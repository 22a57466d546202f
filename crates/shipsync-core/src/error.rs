//! Error types for the shipsync core.

use thiserror::Error;

/// Errors raised by pure model operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("unknown session status: {0}")]
    UnknownStatus(String),

    #[error("malformed identifier: {0}")]
    MalformedId(String),
}
