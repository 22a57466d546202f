//! Runtime configuration for bulk sessions and auto-sync workers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use shipsync_core::{CoreError, RetryPolicy};

/// Configuration for bulk sync sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Hard timeout for every remote and store call, in milliseconds.
    pub remote_timeout_ms: u64,
    /// A session with this many failed units or more finalizes as failed.
    pub error_ceiling: u64,
    /// Retry policy for page fetches and per-record writes.
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            remote_timeout_ms: 30_000,
            error_ceiling: 25,
            retry: RetryPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.remote_timeout_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "session remote_timeout_ms must be positive".into(),
            ));
        }
        if self.error_ceiling == 0 {
            return Err(CoreError::InvalidConfig(
                "session error_ceiling must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the auto-sync worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSyncRuntimeConfig {
    /// Maximum single-record syncs running at once.
    pub max_in_flight: usize,
    /// Hard timeout for every remote and store call, in milliseconds.
    pub remote_timeout_ms: u64,
}

impl Default for AutoSyncRuntimeConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            remote_timeout_ms: 10_000,
        }
    }
}

impl AutoSyncRuntimeConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_in_flight == 0 {
            return Err(CoreError::InvalidConfig(
                "auto-sync max_in_flight must be at least 1".into(),
            ));
        }
        if self.remote_timeout_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "auto-sync remote_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SessionConfig::default().validate().is_ok());
        assert!(AutoSyncRuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let config = SessionConfig {
            error_ceiling: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
