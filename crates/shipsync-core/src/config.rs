//! AutoSyncConfig: operator knobs for status-triggered single-record sync.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::CoreError;
use crate::retry::RetryPolicy;
use crate::types::StatusValue;

/// Upper bound accepted for `retry_attempts`.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Upper bound accepted for `retry_delay_seconds`.
pub const MAX_RETRY_DELAY_SECONDS: u64 = 3600;

/// Persisted auto-sync settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoSyncConfig {
    pub enabled: bool,
    pub trigger_statuses: BTreeSet<StatusValue>,
    pub retry_attempts: u32,
    pub retry_delay_seconds: u64,
}

impl Default for AutoSyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_statuses: ["delivered", "returned", "exception"]
                .into_iter()
                .map(StatusValue::from)
                .collect(),
            retry_attempts: 3,
            retry_delay_seconds: 30,
        }
    }
}

impl AutoSyncConfig {
    /// Whether an event moving a record to `status` should trigger a sync.
    pub fn triggers_on(&self, status: &StatusValue) -> bool {
        self.enabled && self.trigger_statuses.contains(status)
    }

    /// The retry policy described by these settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_secs(self.retry_delay_seconds),
        )
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(CoreError::InvalidConfig(format!(
                "retry_attempts must be at most {MAX_RETRY_ATTEMPTS}"
            )));
        }
        if self.retry_delay_seconds > MAX_RETRY_DELAY_SECONDS {
            return Err(CoreError::InvalidConfig(format!(
                "retry_delay_seconds must be at most {MAX_RETRY_DELAY_SECONDS}"
            )));
        }
        if self.trigger_statuses.iter().any(|s| s.as_str().trim().is_empty()) {
            return Err(CoreError::InvalidConfig(
                "trigger statuses must not be blank".into(),
            ));
        }
        Ok(())
    }

    /// Apply a partial update, returning the merged configuration.
    pub fn merged(&self, update: &AutoSyncConfigUpdate) -> Self {
        Self {
            enabled: update.enabled.unwrap_or(self.enabled),
            trigger_statuses: update
                .trigger_statuses
                .clone()
                .unwrap_or_else(|| self.trigger_statuses.clone()),
            retry_attempts: update.retry_attempts.unwrap_or(self.retry_attempts),
            retry_delay_seconds: update
                .retry_delay_seconds
                .unwrap_or(self.retry_delay_seconds),
        }
    }
}

/// Partial update: `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSyncConfigUpdate {
    pub enabled: Option<bool>,
    pub trigger_statuses: Option<BTreeSet<StatusValue>>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_never_triggers() {
        let config = AutoSyncConfig::default();
        assert!(!config.triggers_on(&"delivered".into()));
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let base = AutoSyncConfig::default();
        let update = AutoSyncConfigUpdate {
            enabled: Some(true),
            retry_attempts: Some(5),
            ..Default::default()
        };
        let merged = base.merged(&update);

        assert!(merged.enabled);
        assert_eq!(merged.retry_attempts, 5);
        assert_eq!(merged.retry_delay_seconds, base.retry_delay_seconds);
        assert_eq!(merged.trigger_statuses, base.trigger_statuses);
        assert!(merged.triggers_on(&"delivered".into()));
        assert!(!merged.triggers_on(&"in_transit".into()));
    }

    #[test]
    fn test_validate_bounds() {
        let mut config = AutoSyncConfig::default();
        assert!(config.validate().is_ok());

        config.retry_attempts = MAX_RETRY_ATTEMPTS + 1;
        assert!(config.validate().is_err());

        config.retry_attempts = 1;
        config.retry_delay_seconds = MAX_RETRY_DELAY_SECONDS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_update_deserializes_partially() {
        let update: AutoSyncConfigUpdate =
            serde_json::from_str(r#"{"retry_delay_seconds": 5}"#).unwrap();
        assert_eq!(update.retry_delay_seconds, Some(5));
        assert!(update.enabled.is_none());
    }
}
