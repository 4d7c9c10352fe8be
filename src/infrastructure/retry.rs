//! Retry policy with exponential backoff and jitter
//!
//! Wraps fallible async operations for transient failures such as network
//! errors and slow pages. Non-retryable errors propagate on the first
//! failure; once all attempts are spent the caller receives
//! [`CrawlerError::RetryExhausted`] carrying the attempt count.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::errors::CrawlerError;
use crate::infrastructure::config::RetryConfig;

/// Configured retry behavior. Total attempts = `max_retries + 1`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_backoff: bool,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            exponential_backoff: true,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            exponential_backoff: config.exponential_backoff,
            jitter: config.jitter,
        }
    }

    /// Backoff before retry `k+1`, `k` being the zero-based failed attempt.
    ///
    /// `min(base × 2^k, max)` when exponential, flat base otherwise; jitter
    /// scales the result by a uniform factor in [0.5, 1.5).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = if self.exponential_backoff {
            let factor = 2u32.saturating_pow(attempt.min(31));
            self.base_delay.saturating_mul(factor).min(self.max_delay)
        } else {
            self.base_delay
        };
        if self.jitter {
            base.mul_f64(0.5 + fastrand::f64())
        } else {
            base
        }
    }

    /// Runs `op` with the default retryable classification
    /// ([`CrawlerError::is_retryable`]) and no side-effect hook.
    pub async fn execute<T, F, Fut>(&self, ctx: &str, op: F) -> Result<T, CrawlerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CrawlerError>>,
    {
        self.execute_with(ctx, op, CrawlerError::is_retryable, |_, _| {}).await
    }

    /// Runs `op`, retrying failures accepted by `retryable`.
    ///
    /// `on_retry(attempt, error)` fires before each backoff sleep with the
    /// one-based attempt number that just failed.
    pub async fn execute_with<T, F, Fut, P, H>(
        &self,
        ctx: &str,
        mut op: F,
        retryable: P,
        mut on_retry: H,
    ) -> Result<T, CrawlerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CrawlerError>>,
        P: Fn(&CrawlerError) -> bool,
        H: FnMut(u32, &CrawlerError),
    {
        for attempt in 0..=self.max_retries {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !retryable(&err) => return Err(err),
                Err(err) if attempt == self.max_retries => {
                    warn!(ctx, attempts = self.max_retries + 1, error = %err, "all retries failed");
                    return Err(CrawlerError::RetryExhausted {
                        attempts: self.max_retries + 1,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        ctx,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after failure"
                    );
                    on_retry(attempt + 1, &err);
                    sleep(delay).await;
                }
            }
        }
        unreachable!("retry loop returns on the final attempt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_backoff: true,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .execute("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, CrawlerError>(42) }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .execute("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(CrawlerError::scrape("transient"))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempt_count() {
        let calls = AtomicU32::new(0);
        let err = fast_policy(2)
            .execute("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CrawlerError::scrape("always fails")) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            CrawlerError::RetryExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_retryable_bypasses_retry() {
        let calls = AtomicU32::new(0);
        let err = fast_policy(5)
            .execute("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CrawlerError::parse("bad price", "x")) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, CrawlerError::Parse { .. }));
    }

    #[tokio::test]
    async fn narrow_predicate_stops_early() {
        let calls = AtomicU32::new(0);
        let err = fast_policy(5)
            .execute_with(
                "test",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(CrawlerError::scrape("would normally retry")) }
                },
                |_| false,
                |_, _| {},
            )
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, CrawlerError::Scrape { .. }));
    }

    #[tokio::test]
    async fn on_retry_hook_sees_each_attempt() {
        let seen = std::sync::Mutex::new(Vec::new());
        let _ = fast_policy(2)
            .execute_with(
                "test",
                || async { Err::<(), _>(CrawlerError::scrape("boom")) },
                |_| true,
                |attempt, _| seen.lock().unwrap().push(attempt),
            )
            .await;
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            exponential_backoff: true,
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(8));
    }

    #[test]
    fn flat_delay_when_backoff_disabled() {
        let policy = RetryPolicy {
            exponential_backoff: false,
            jitter: false,
            base_delay: Duration::from_secs(3),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(3));
    }

    #[test]
    fn jitter_stays_in_band() {
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            exponential_backoff: false,
            jitter: true,
        };
        for _ in 0..100 {
            let d = policy.delay_for_attempt(0);
            assert!(d >= Duration::from_secs(1) && d < Duration::from_secs(3), "{d:?}");
        }
    }
}
