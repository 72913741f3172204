//! Bounded retry with exponential backoff.

use deskpilot_core::BridgeError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How often, and how patiently, a failed call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay slept after the failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails permanently, or the retries run out.
    /// `op` receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, action: &str, mut op: F) -> Result<T, BridgeError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        action,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Worker call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert!(policy.delay_for(40) >= policy.delay_for(31));
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_retries_plus_one_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), _> = policy
            .run("screenshot", |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(BridgeError::Timeout {
                        action: "screenshot".into(),
                        timeout_ms: 10,
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(BridgeError::Timeout { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s of backoff
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let result = policy
            .run("size", |attempt| async move {
                if attempt == 0 {
                    Err(BridgeError::WorkerCrashed {
                        reason: "killed".into(),
                    })
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .run("click", |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(BridgeError::Destroyed) }
            })
            .await;
        assert!(matches!(result, Err(BridgeError::Destroyed)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
