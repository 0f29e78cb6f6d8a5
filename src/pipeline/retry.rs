//! Bounded retry with exponential backoff.
//!
//! Vision APIs return transient 429/503 errors and time out under load.
//! [`retry_with_backoff`] runs an operation up to `max_attempts` times,
//! sleeping `initial_backoff_ms * 2^(n-1)` (capped at `max_backoff_ms`)
//! between attempts, and returns the last error once the budget is spent.
//! With the defaults the waits are 4 s and 8 s; a longer budget is capped at 16 s.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// How often and how patiently to retry a failing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always ≥ 1.
    pub max_attempts: u32,
    /// Wait before the second attempt, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single wait.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 4_000,
            max_backoff_ms: 16_000,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Meant for tests and local backends.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Wait before attempt `attempt` (1-indexed; the first attempt never waits).
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u64.saturating_pow(attempt - 2);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Run `op` until it succeeds or the policy's attempts are exhausted.
///
/// `label` identifies the call in log lines (e.g. `"classify page 3"`).
/// Returns the value of the first success, or the error of the last attempt.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let wait = policy.backoff_before(attempt);
        if !wait.is_zero() {
            warn!(
                "{}: retry {}/{} after {}ms",
                label,
                attempt - 1,
                attempts - 1,
                wait.as_millis()
            );
            sleep(wait).await;
        }

        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{}: succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt >= attempts => {
                warn!("{}: giving up after {} attempts: {}", label, attempts, e);
                return Err(e);
            }
            Err(e) => {
                warn!("{}: attempt {} failed: {}", label, attempt, e);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_schedule_is_4_8_16() {
        let p = RetryPolicy {
            max_attempts: 5,
            ..RetryPolicy::default()
        };
        assert_eq!(p.backoff_before(1), Duration::ZERO);
        assert_eq!(p.backoff_before(2), Duration::from_secs(4));
        assert_eq!(p.backoff_before(3), Duration::from_secs(8));
        assert_eq!(p.backoff_before(4), Duration::from_secs(16));
        assert_eq!(p.backoff_before(5), Duration::from_secs(16));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, String> = tokio_test::block_on(retry_with_backoff(
            &RetryPolicy::immediate(3),
            "test",
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(format!("transient {n}"))
                    } else {
                        Ok("ok")
                    }
                }
            },
        ));
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn returns_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = tokio_test::block_on(retry_with_backoff(
            &RetryPolicy::immediate(3),
            "test",
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(format!("failure {n}")) }
            },
        ));
        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = tokio_test::block_on(retry_with_backoff(
            &RetryPolicy::immediate(0),
            "test",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("nope".to_string()) }
            },
        ));
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
