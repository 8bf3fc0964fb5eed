//! Bounded-random retry backoff.
//!
//! Unlike a classic exponential-backoff policy, the wire protocol calls for
//! a uniformly random delay in `[0, max_interval]` on every attempt — see
//! `MAX_RETRY_INTERVAL_MS`. This keeps the builder-and-instrumented-loop
//! shape of a conventional retry helper while using that backoff formula.

use std::time::Duration;

use quay_core::MAX_RETRY_INTERVAL_MS;
use rand::Rng;

/// Configuration for [`retry_with_backoff`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: usize,
    max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_interval: Duration::from_millis(MAX_RETRY_INTERVAL_MS),
        }
    }
}

impl RetryPolicy {
    /// Start building a policy, defaulting to 5 attempts and the protocol's
    /// `MAX_RETRY_INTERVAL_MS` cap.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder(Self::default())
    }

    /// Maximum number of attempts before giving up.
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// A uniformly random delay in `[0, max_interval]`.
    #[must_use]
    pub fn random_delay(&self) -> Duration {
        let cap_ms = u64::try_from(self.max_interval.as_millis()).unwrap_or(u64::MAX);
        let ms = rand::thread_rng().gen_range(0..=cap_ms);
        Duration::from_millis(ms)
    }
}

/// Fluent builder for [`RetryPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicyBuilder(RetryPolicy);

impl RetryPolicyBuilder {
    /// Override the maximum number of attempts.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.0.max_attempts = max_attempts;
        self
    }

    /// Override the maximum backoff interval.
    #[must_use]
    pub const fn max_interval(mut self, max_interval: Duration) -> Self {
        self.0.max_interval = max_interval;
        self
    }

    /// Finish building.
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        self.0
    }
}

/// Retry `operation` under `policy`, sleeping a random bounded delay
/// between attempts, until it succeeds or the attempt budget is exhausted.
///
/// # Errors
///
/// Returns the last error `operation` produced once attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0usize;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts() {
                    tracing::error!(attempt, %err, "retries exhausted");
                    return Err(err);
                }
                let delay = policy.random_delay();
                tracing::warn!(attempt, %err, delay_ms = delay.as_millis() as u64, "retrying after backoff");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_on_first_try() {
        let policy = RetryPolicy::builder().max_attempts(3).build();
        let calls = AtomicUsize::new(0);
        let result: Result<u32, &str> = retry_with_backoff(policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_failures() {
        let policy = RetryPolicy::builder()
            .max_attempts(5)
            .max_interval(Duration::from_millis(1))
            .build();
        let calls = AtomicUsize::new(0);
        let result: Result<u32, &str> = retry_with_backoff(policy, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("not yet")
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_retries() {
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .max_interval(Duration::from_millis(1))
            .build();
        let calls = AtomicUsize::new(0);
        let result: Result<u32, &str> = retry_with_backoff(policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("always fails")
        })
        .await;
        assert_eq!(result, Err("always fails"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn random_delay_is_bounded() {
        let policy = RetryPolicy::builder()
            .max_interval(Duration::from_millis(50))
            .build();
        for _ in 0..200 {
            assert!(policy.random_delay() <= Duration::from_millis(50));
        }
    }
}
