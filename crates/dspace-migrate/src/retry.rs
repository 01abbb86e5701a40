//! Bounded retry with exponential backoff.
//!
//! One executor replaces the ad-hoc retry loops the call sites would
//! otherwise grow. Only errors classified transient are retried; permanent
//! failures propagate on the first attempt.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::EngineConfig;
use crate::error::{MigrateError, Result};

/// Retry policy attached to a class of fallible operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles per attempt.
    pub base_delay: Duration,

    /// Backoff cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Build the run-wide policy from engine configuration.
    pub fn from_engine(engine: &EngineConfig) -> Self {
        Self {
            max_attempts: engine.max_retries,
            base_delay: engine.retry_base_delay(),
            max_delay: engine.retry_max_delay(),
        }
    }

    /// Backoff before attempt `attempt + 1`, given 1-based `attempt`
    /// just failed: `base * 2^(attempt-1)`, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Executes fallible operations under a retry policy.
///
/// Pure orchestration with no shared mutable state; clone freely, one per
/// pump if desired.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` up to `max_attempts` times, backing off between attempts.
    pub async fn execute<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_counted(what, op).await.map(|(value, _)| value)
    }

    /// Like [`execute`](Self::execute), also reporting how many attempts
    /// were used. Callers that account for retries (the pump's per-table
    /// report) use this variant.
    pub async fn execute_counted<T, F, Fut>(&self, what: &str, mut op: F) -> Result<(T, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(value) => return Ok((value, attempt)),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) if attempt >= self.policy.max_attempts => {
                    return Err(MigrateError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        "{}: attempt {}/{} failed ({}), retrying in {:?}",
                        what, attempt, self.policy.max_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(40));
        // Capped
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let executor = RetryExecutor::new(quick_policy(5));
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let (value, attempts) = executor
            .execute_counted("op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(MigrateError::Transient("connection reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms after the first failure, 200ms after the second.
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_final_error() {
        let executor = RetryExecutor::new(quick_policy(3));
        let calls = AtomicU32::new(0);

        let err = executor
            .execute("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(MigrateError::Transient("timeout".into())) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            MigrateError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(source.to_string().contains("timeout"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let executor = RetryExecutor::new(quick_policy(3));
        let calls = AtomicU32::new(0);

        let err = executor
            .execute("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(MigrateError::Validation {
                        entity: "item/9".into(),
                        message: "missing handle".into(),
                    })
                }
            })
            .await
            .unwrap_err();

        // Exactly one attempt, error passed through unwrapped.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, MigrateError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_first_attempt_success_is_uncounted() {
        let executor = RetryExecutor::new(quick_policy(3));
        let (value, attempts) = executor
            .execute_counted("op", || async { Ok("ok") })
            .await
            .unwrap();
        assert_eq!(value, "ok");
        assert_eq!(attempts, 1);
    }
}
