//! Retry loop with exponential backoff for calls against the flaky external
//! generation service.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff policy: delay = `base_delay * 2^attempt_index`,
/// capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first try included. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after the failure of attempt `attempt_index` (0-based).
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt_index.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds or the policy is exhausted, sleeping
/// the backoff delay between attempts. The closure receives the 0-based
/// attempt index so callers can derive fresh per-attempt state.
///
/// On exhaustion, returns the last error together with the attempt count.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> Result<T, (E, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt + 1 >= max_attempts {
                    warn!(operation, attempts = attempt + 1, %err, "all attempts failed");
                    return Err((err, attempt + 1));
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    retry_in_ms = delay.as_millis() as u64,
                    %err,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
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
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures_with_backoff_schedule() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        };
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let out = retry_with_backoff(&policy, "test-op", |_attempt| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok("clip-url")
                }
            }
        })
        .await;

        assert_eq!(out.unwrap(), "clip-url");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two failures: 1s + 2s of virtual backoff.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn reports_last_error_and_attempt_count_on_exhaustion() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        };
        let calls = AtomicU32::new(0);

        let out: Result<(), _> = retry_with_backoff(&policy, "test-op", |_attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("still broken") }
        })
        .await;

        let (err, attempts) = out.unwrap_err();
        assert_eq!(err, "still broken");
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn passes_fresh_attempt_index_to_each_call() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let seen = std::sync::Mutex::new(Vec::new());

        let _: Result<(), _> = retry_with_backoff(&policy, "test-op", |attempt| {
            seen.lock().unwrap().push(attempt);
            async { Err("nope") }
        })
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }
}
