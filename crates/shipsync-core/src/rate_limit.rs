//! Sliding-window attempt tracking with lockout.
//!
//! Only failures inside the trailing `window_ms` count towards
//! `max_attempts`. Reaching the limit blocks the key until
//! `block_duration_ms` has elapsed since the most recent failure; failures
//! recorded while blocked push the deadline out again. Successes are
//! logged but never count and never clear earlier failures.

use serde::{Deserialize, Serialize};
use std::fmt;

const MINUTE_MS: i64 = 60 * 1000;

/// Identifies one rate-limited subject, e.g. `("password_reset", "a@x.com")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RateLimitKey {
    pub action: String,
    pub identifier: String,
}

impl RateLimitKey {
    pub fn new(action: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action, self.identifier)
    }
}

/// Limits for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window_ms: i64,
    pub block_duration_ms: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_ms: 15 * MINUTE_MS,
            block_duration_ms: 30 * MINUTE_MS,
        }
    }
}

impl RateLimitConfig {
    /// How long a logged attempt can still influence a decision.
    pub fn ttl_ms(&self) -> i64 {
        self.window_ms.max(self.block_duration_ms)
    }
}

/// One logged attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub at: i64,
    pub success: bool,
}

/// Answer to "may this subject try again now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining_attempts: Option<u32>,
    /// When the block lifts, or when the oldest counted failure leaves the
    /// window. `None` when nothing is counted.
    pub reset_time: Option<i64>,
}

/// Attempt history for a single key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptLog {
    /// Ordered by `at`.
    pub attempts: Vec<Attempt>,
    pub blocked_until: Option<i64>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty() && self.blocked_until.is_none()
    }

    /// Append an attempt and update the block deadline.
    pub fn record(&mut self, config: &RateLimitConfig, at: i64, success: bool) {
        let pos = self.attempts.partition_point(|a| a.at <= at);
        self.attempts.insert(pos, Attempt { at, success });

        if success {
            return;
        }

        let already_blocked = self.blocked_until.is_some_and(|until| at < until);
        if already_blocked || self.failures_in_window(config, at) >= config.max_attempts {
            let until = at + config.block_duration_ms;
            self.blocked_until = Some(self.blocked_until.map_or(until, |u| u.max(until)));
        }
    }

    /// Drop attempts older than the config's TTL, and a lapsed block.
    pub fn prune(&mut self, config: &RateLimitConfig, now: i64) {
        let cutoff = now - config.ttl_ms();
        self.attempts.retain(|a| a.at > cutoff);
        if self.blocked_until.is_some_and(|until| until <= now) {
            self.blocked_until = None;
        }
    }

    /// Latest attempt time, used to compute storage expiry.
    pub fn last_attempt_at(&self) -> Option<i64> {
        self.attempts.last().map(|a| a.at)
    }

    /// Expiry of the whole log: TTL after the last attempt, or the block
    /// deadline if later.
    pub fn expires_at(&self, config: &RateLimitConfig) -> Option<i64> {
        let by_attempts = self.last_attempt_at().map(|at| at + config.ttl_ms());
        match (by_attempts, self.blocked_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Evaluate the log at `now`.
    pub fn evaluate(&self, config: &RateLimitConfig, now: i64) -> RateLimitDecision {
        if let Some(until) = self.blocked_until {
            if now < until {
                return RateLimitDecision {
                    allowed: false,
                    remaining_attempts: Some(0),
                    reset_time: Some(until),
                };
            }
        }

        let window_start = now - config.window_ms;
        let counted: Vec<i64> = self
            .attempts
            .iter()
            .filter(|a| !a.success && a.at > window_start && a.at <= now)
            .map(|a| a.at)
            .collect();

        RateLimitDecision {
            allowed: true,
            remaining_attempts: Some(config.max_attempts.saturating_sub(counted.len() as u32)),
            reset_time: counted.first().map(|oldest| oldest + config.window_ms),
        }
    }

    fn failures_in_window(&self, config: &RateLimitConfig, at: i64) -> u32 {
        let window_start = at - config.window_ms;
        self.attempts
            .iter()
            .filter(|a| !a.success && a.at > window_start && a.at <= at)
            .count() as u32
    }
}
