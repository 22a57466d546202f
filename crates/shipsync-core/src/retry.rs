//! Fixed-delay retry policy.
//!
//! The delay is the operator's `retry_delay_seconds` knob taken literally:
//! no exponential growth, no jitter. `attempt` counts retries already made,
//! so an always-failing retryable call runs `max_retries + 1` times.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Classifies an error as retryable (network, timeout) or terminal
/// (validation, permission). Only retryable errors consume an attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Outcome of consulting the policy after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub const GIVE_UP: Self = Self {
        retry: false,
        delay: Duration::ZERO,
    };
}

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries).
    pub max_retries: u32,
    /// Fixed pause between attempts.
    #[serde(with = "duration_millis")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Decide whether retry number `attempt + 1` may run.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_retries {
            RetryDecision::GIVE_UP
        } else {
            RetryDecision {
                retry: true,
                delay: self.delay,
            }
        }
    }

    /// Decide for a concrete error; terminal errors are never retried.
    pub fn should_retry<E: Retryable>(&self, attempt: u32, error: &E) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GIVE_UP;
        }
        self.decide(attempt)
    }

    /// Total number of calls an always-failing retryable operation gets.
    pub fn max_calls(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Flaky(bool);

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::new(3, Duration::from_secs(30));
        for attempt in 0..3 {
            let decision = policy.decide(attempt);
            assert!(decision.retry);
            assert_eq!(decision.delay, Duration::from_secs(30));
        }
        assert_eq!(policy.decide(3), RetryDecision::GIVE_UP);
    }

    #[test]
    fn test_terminal_errors_do_not_retry() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        assert!(policy.should_retry(0, &Flaky(true)).retry);
        assert!(!policy.should_retry(0, &Flaky(false)).retry);
    }

    #[test]
    fn test_zero_retries() {
        let policy = RetryPolicy::none();
        assert!(!policy.decide(0).retry);
        assert_eq!(policy.max_calls(), 1);
    }

    #[test]
    fn test_serde_millis() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1500));
        let json = serde_json::to_string(&policy).unwrap();
        assert_eq!(json, r#"{"max_retries":2,"delay":1500}"#);
        let back: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }

    proptest! {
        #[test]
        fn always_failing_call_runs_max_retries_plus_one(max_retries in 0u32..20) {
            let policy = RetryPolicy::new(max_retries, Duration::ZERO);
            let mut calls = 0u32;
            let mut attempt = 0u32;
            loop {
                calls += 1;
                if !policy.should_retry(attempt, &Flaky(true)).retry {
                    break;
                }
                attempt += 1;
            }
            prop_assert_eq!(calls, max_retries + 1);
        }
    }
}
