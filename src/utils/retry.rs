use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Exponential Backoff Retry
// ============================================================================
//
// Used where waiting is cheap and giving up is expensive: connecting to the
// primary store at startup. Request-path operations never retry internally;
// `TransactionFailed` is returned to the caller, who may retry.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2,
        }
    }
}

impl BackoffPolicy {
    /// Patient policy for waiting on a database that is still starting
    pub fn startup() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            multiplier: 2,
        }
    }

    /// Delay slept after the failed `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` is spent.
/// The last error is returned when every attempt failed.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &BackoffPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if attempt >= policy.max_attempts => {
                tracing::error!(
                    operation = operation_name,
                    attempt,
                    error = %error,
                    "Giving up after all attempts"
                );
                return Err(error);
            }
            Err(error) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying after delay"
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2,
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(&quick(3), "connect", |_attempt| {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("connection refused")
                } else {
                    Ok("pool")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("pool"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error() {
        let result = retry_with_backoff(&quick(2), "connect", |attempt| async move {
            Err::<(), _>(format!("attempt {attempt} refused"))
        })
        .await;

        assert_eq!(result, Err("attempt 2 refused".to_string()));
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2,
        };

        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
        assert_eq!(policy.delay_after(40), Duration::from_millis(500));
    }
}
