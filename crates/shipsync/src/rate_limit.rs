//! Rate limiting of sensitive operations.
//!
//! Attempt logs live in the store keyed by `(action, identifier)`; the
//! sliding-window rules themselves are in [`AttemptLog`]. Every method has an
//! `_at` variant taking an explicit clock reading.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use shipsync_core::{now_millis, AttemptLog, RateLimitDecision, RateLimitKey};
use shipsync_store::RateLimitStore;

use crate::config::RateLimitSettings;
use crate::error::Result;

/// Sliding-window limiter over a [`RateLimitStore`].
pub struct RateLimiter<S: ?Sized> {
    store: Arc<S>,
    settings: RateLimitSettings,
    /// Serializes read-modify-write of attempt logs.
    write_lock: Mutex<()>,
}

impl<S: RateLimitStore + ?Sized> RateLimiter<S> {
    pub fn new(store: Arc<S>, settings: RateLimitSettings) -> Self {
        Self {
            store,
            settings,
            write_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// May `identifier` attempt `action` now?
    pub async fn check(&self, action: &str, identifier: &str) -> Result<RateLimitDecision> {
        self.check_at(action, identifier, now_millis()).await
    }

    pub async fn check_at(
        &self,
        action: &str,
        identifier: &str,
        now: i64,
    ) -> Result<RateLimitDecision> {
        let config = self.settings.for_action(action);
        let key = RateLimitKey::new(action, identifier);

        let mut log = self.store.load_attempt_log(&key, now).await?;
        log.prune(&config, now);
        Ok(log.evaluate(&config, now))
    }

    /// Log an attempt and return the decision that now applies.
    pub async fn record(
        &self,
        action: &str,
        identifier: &str,
        success: bool,
    ) -> Result<RateLimitDecision> {
        self.record_at(action, identifier, success, now_millis()).await
    }

    pub async fn record_at(
        &self,
        action: &str,
        identifier: &str,
        success: bool,
        now: i64,
    ) -> Result<RateLimitDecision> {
        let config = self.settings.for_action(action);
        let key = RateLimitKey::new(action, identifier);
        let _guard = self.write_lock.lock().await;

        let mut log: AttemptLog = self.store.load_attempt_log(&key, now).await?;
        log.prune(&config, now);
        let was_allowed = log.evaluate(&config, now).allowed;

        log.record(&config, now, success);
        self.store
            .save_attempt_log(&key, &log, log.expires_at(&config))
            .await?;

        let decision = log.evaluate(&config, now);
        if was_allowed && !decision.allowed {
            warn!(
                key = %key,
                reset_time = decision.reset_time,
                "rate limit reached, key blocked"
            );
        } else {
            debug!(key = %key, success, remaining = decision.remaining_attempts, "attempt recorded");
        }
        Ok(decision)
    }

    /// Clear a key. Returns whether anything was stored for it.
    pub async fn reset(&self, action: &str, identifier: &str) -> Result<bool> {
        let key = RateLimitKey::new(action, identifier);
        let _guard = self.write_lock.lock().await;
        let removed = self.store.delete_attempt_log(&key).await?;
        if removed {
            debug!(key = %key, "rate limit reset");
        }
        Ok(removed)
    }

    /// Delete logs whose TTL has passed.
    pub async fn purge_expired(&self) -> Result<u64> {
        self.purge_expired_at(now_millis()).await
    }

    pub async fn purge_expired_at(&self, now: i64) -> Result<u64> {
        let purged = self.store.purge_expired_attempt_logs(now).await?;
        if purged > 0 {
            debug!(purged, "expired rate limit logs purged");
        }
        Ok(purged)
    }
}
