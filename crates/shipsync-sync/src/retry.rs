//! Running remote and store calls under a retry policy with a hard timeout.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use shipsync_core::RetryPolicy;

use crate::error::{Result, SyncError};

/// Executes fallible async calls under a [`RetryPolicy`].
///
/// Every call is bounded by `timeout`; an elapsed timeout becomes
/// [`SyncError::Timeout`], which is retryable. Terminal errors return at once.
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    timeout: Duration,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, timeout: Duration) -> Self {
        Self { policy, timeout }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` until it succeeds, fails terminally, or retries run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_counted(operation, call).await.0
    }

    /// Like [`run`](Self::run), also reporting how many calls were made.
    pub async fn run_counted<T, F, Fut>(&self, operation: &str, mut call: F) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(self.timeout)),
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempts = attempt + 1, "call succeeded after retry");
                    }
                    return (Ok(value), attempt + 1);
                }
                Err(e) => e,
            };

            let decision = self.policy.should_retry(attempt, &error);
            if !decision.retry {
                if attempt > 0 {
                    warn!(
                        operation,
                        attempts = attempt + 1,
                        error = %error,
                        "giving up after retries"
                    );
                }
                return (Err(error), attempt + 1);
            }

            attempt += 1;
            debug!(
                operation,
                attempt,
                max_retries = self.policy.max_retries,
                delay_ms = decision.delay.as_millis() as u64,
                error = %error,
                "retrying after failure"
            );
            if !decision.delay.is_zero() {
                tokio::time::sleep(decision.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(max_retries: u32) -> RetryExecutor {
        RetryExecutor::new(
            RetryPolicy::new(max_retries, Duration::from_millis(1)),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_retryable_failure_is_bounded() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let (result, attempts) = executor(3)
            .run_counted("flaky", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(SyncError::unavailable("down"))
            })
            .await;

        assert!(matches!(result, Err(SyncError::RemoteUnavailable(_))));
        assert_eq!(attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result = executor(3)
            .run("rejected", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(SyncError::rejected("forbidden"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let value = executor(3)
            .run("eventually", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SyncError::unavailable("blip"))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_retryable() {
        let executor = RetryExecutor::new(
            RetryPolicy::new(1, Duration::ZERO),
            Duration::from_millis(10),
        );

        let (result, attempts) = executor
            .run_counted("slow", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, SyncError>(())
            })
            .await;

        assert!(matches!(result, Err(SyncError::Timeout(_))));
        assert_eq!(attempts, 2);
    }
}
