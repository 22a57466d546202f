//! Engine configuration.
//!
//! Everything is optional in the serialized form; missing fields fall back
//! to their defaults.
//!
//! ```json
//! {
//!   "session": { "remote_timeout_ms": 30000, "error_ceiling": 25,
//!                "retry": { "max_retries": 3, "delay": 1000 } },
//!   "auto_sync": { "max_in_flight": 4, "remote_timeout_ms": 10000 },
//!   "rate_limit": {
//!     "default": { "max_attempts": 5, "window_ms": 900000, "block_duration_ms": 1800000 },
//!     "actions": { "manual_sync": { "max_attempts": 3 } }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use shipsync_core::RateLimitConfig;
use shipsync_sync::{AutoSyncRuntimeConfig, SessionConfig};

use crate::error::{EngineError, Result};

/// Rate limits: a default plus per-action overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub default: RateLimitConfig,
    pub actions: BTreeMap<String, RateLimitConfig>,
}

impl RateLimitSettings {
    /// Limits that apply to `action`.
    pub fn for_action(&self, action: &str) -> RateLimitConfig {
        self.actions.get(action).copied().unwrap_or(self.default)
    }

    fn validate(&self) -> Result<()> {
        let all = std::iter::once(("default", &self.default))
            .chain(self.actions.iter().map(|(name, config)| (name.as_str(), config)));

        for (name, config) in all {
            if config.max_attempts == 0 {
                return Err(EngineError::Config(format!(
                    "rate limit {name}: max_attempts must be at least 1"
                )));
            }
            if config.window_ms <= 0 {
                return Err(EngineError::Config(format!(
                    "rate limit {name}: window_ms must be positive"
                )));
            }
            if config.block_duration_ms < 0 {
                return Err(EngineError::Config(format!(
                    "rate limit {name}: block_duration_ms must not be negative"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for the Engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub session: SessionConfig,
    pub auto_sync: AutoSyncRuntimeConfig,
    pub rate_limit: RateLimitSettings,
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.session
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        self.auto_sync
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        self.rate_limit.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_action_override() {
        let config = EngineConfig::from_json_str(
            r#"{
                "session": { "error_ceiling": 5 },
                "rate_limit": { "actions": { "manual_sync": { "max_attempts": 2 } } }
            }"#,
        )
        .unwrap();

        assert_eq!(config.session.error_ceiling, 5);
        assert_eq!(config.session.remote_timeout_ms, 30_000);

        let manual = config.rate_limit.for_action("manual_sync");
        assert_eq!(manual.max_attempts, 2);
        assert_eq!(manual.window_ms, RateLimitConfig::default().window_ms);
        assert_eq!(config.rate_limit.for_action("login"), RateLimitConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::from_json_str(r#"{ "auto_sync": { "max_in_flight": 0 } }"#).is_err());
        assert!(EngineConfig::from_json_str(
            r#"{ "rate_limit": { "default": { "window_ms": 0 } } }"#
        )
        .is_err());
        assert!(EngineConfig::from_json_str("not json").is_err());
    }
}
