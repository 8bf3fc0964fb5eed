//! Circuit breaker guarding a leader broker's link to the registry.
//!
//! The leader's only coordinator dependency is its registry link: it sends
//! heartbeats and `InsyncChange` pushes over it. A flaky link shouldn't hang
//! every publish behind a multi-second RPC timeout, so failed registry calls
//! are routed through a breaker instead. Once enough of them fail in a row,
//! the breaker opens and `BrokerCore::publish` starts failing fast with
//! `BrokerError::RegistryLinkDown` until the link proves itself again or a
//! `/swap` demotes this broker entirely.
//!
//! # States
//!
//! - **Closed**: registry calls go through normally; failures are counted.
//! - **Open**: calls fail immediately without touching the network.
//! - **HalfOpen**: after a cooldown, a handful of calls are let through to
//!   probe whether the link has recovered.
//!
//! # Example
//!
//! ```rust
//! use quay_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig::builder()
//!     .failure_threshold(5)
//!     .timeout(Duration::from_secs(60))
//!     .success_threshold(2)
//!     .build();
//!
//! let breaker = CircuitBreaker::new(config);
//!
//! match breaker.call(|| async {
//!     // push an InsyncChange to the registry
//!     Ok::<_, String>(())
//! }).await {
//!     Ok(()) => println!("registry link healthy"),
//!     Err(e) => println!("registry link degraded: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before the link is declared down.
    pub failure_threshold: usize,
    /// How long to wait before probing a down link again.
    pub timeout: Duration,
    /// Number of successful probes needed to declare the link healthy again.
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            failure_threshold: Some(5),
            timeout: Some(Duration::from_secs(60)),
            success_threshold: Some(2),
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: Option<usize>,
    timeout: Option<Duration>,
    success_threshold: Option<usize>,
}

impl CircuitBreakerConfigBuilder {
    /// Set the failure threshold.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Set the cooldown duration before a probe is allowed.
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Set how many successful probes close the circuit again.
    #[must_use]
    pub const fn success_threshold(mut self, threshold: usize) -> Self {
        self.success_threshold = Some(threshold);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(5),
            timeout: self.timeout.unwrap_or(Duration::from_secs(60)),
            success_threshold: self.success_threshold.unwrap_or(2),
        }
    }
}

/// Registry-link health as tracked by the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Link is healthy; calls go through.
    Closed,
    /// Link is down; calls are rejected without touching the network.
    Open,
    /// Cooldown elapsed; a limited number of probes are allowed through.
    HalfOpen,
}

/// Errors from a guarded registry call.
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// The registry link is open; the call was rejected without being attempted.
    #[error("registry link is down")]
    Open,
    /// The call was attempted and failed.
    #[error("registry call failed: {0}")]
    Inner(E),
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    last_failure_time: Option<Instant>,
}

/// Breaker guarding the leader's registry link.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<RwLock<CircuitBreakerState>>,
}

impl CircuitBreaker {
    /// Create a new breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            })),
        }
    }

    /// Current link health.
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.state
    }

    /// Run a registry call through the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitBreakerError::Open`] if the link is currently down,
    /// or [`CircuitBreakerError::Inner`] if the call itself fails.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.can_attempt().await {
            tracing::warn!("registry link circuit is OPEN, rejecting call");
            return Err(CircuitBreakerError::Open);
        }

        match operation().await {
            Ok(result) => {
                self.on_success().await;
                Ok(result)
            }
            Err(err) => {
                self.on_failure().await;
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    async fn can_attempt(&self) -> bool {
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if let Some(last_failure) = state.last_failure_time {
                    if last_failure.elapsed() >= self.config.timeout {
                        tracing::info!("registry link circuit OPEN -> HALF_OPEN");
                        state.state = CircuitState::HalfOpen;
                        state.success_count = 0;
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            }
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    tracing::info!(
                        successes = state.success_count,
                        "registry link circuit HALF_OPEN -> CLOSED"
                    );
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.last_failure_time = None;
                }
            }
            CircuitState::Open => {
                state.failure_count = 0;
            }
        }
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = state.failure_count,
                        threshold = self.config.failure_threshold,
                        "registry link circuit CLOSED -> OPEN"
                    );
                    state.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!("registry link circuit HALF_OPEN -> OPEN (probe failed)");
                state.state = CircuitState::Open;
                state.failure_count = 1;
                state.success_count = 0;
            }
            CircuitState::Open => {
                state.failure_count += 1;
            }
        }
    }

    /// Force the breaker back to closed. Used when a `/swap` or fresh
    /// registration re-establishes the link out of band.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        tracing::info!("registry link circuit manually reset to CLOSED");
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.last_failure_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn closed_on_success() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        let result = breaker.call(|| async { Ok::<_, String>(42) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold() {
        let config = CircuitBreakerConfig::builder().failure_threshold(3).build();
        let breaker = CircuitBreaker::new(config);

        for _ in 0..3 {
            let _ = breaker.call(|| async { Err::<i32, _>("registry unreachable") }).await;
        }

        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn rejects_when_open() {
        let config = CircuitBreakerConfig::builder().failure_threshold(2).build();
        let breaker = CircuitBreaker::new(config);

        for _ in 0..2 {
            let _ = breaker.call(|| async { Err::<i32, _>("registry unreachable") }).await;
        }

        let result = breaker.call(|| async { Ok::<_, String>(42) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open)));
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_timeout() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .timeout(Duration::from_millis(50))
            .build();
        let breaker = CircuitBreaker::new(config);

        for _ in 0..2 {
            let _ = breaker.call(|| async { Err::<i32, _>("registry unreachable") }).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let _ = breaker.call(|| async { Ok::<_, String>(42) }).await;

        let state = breaker.state().await;
        assert!(state == CircuitState::HalfOpen || state == CircuitState::Closed);
    }

    #[tokio::test]
    async fn closes_after_success_threshold_probes() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .timeout(Duration::from_millis(50))
            .success_threshold(2)
            .build();
        let breaker = CircuitBreaker::new(config);

        for _ in 0..2 {
            let _ = breaker.call(|| async { Err::<i32, _>("registry unreachable") }).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        for _ in 0..2 {
            let _ = breaker.call(|| async { Ok::<_, String>(42) }).await;
        }

        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn reopens_on_half_open_failure() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .timeout(Duration::from_millis(50))
            .build();
        let breaker = CircuitBreaker::new(config);

        for _ in 0..2 {
            let _ = breaker.call(|| async { Err::<i32, _>("registry unreachable") }).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        let _ = breaker.call(|| async { Err::<i32, _>("registry unreachable") }).await;

        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn manual_reset_closes_circuit() {
        let config = CircuitBreakerConfig::builder().failure_threshold(2).build();
        let breaker = CircuitBreaker::new(config);

        for _ in 0..2 {
            let _ = breaker.call(|| async { Err::<i32, _>("registry unreachable") }).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        breaker.reset().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn concurrent_calls_all_succeed_when_closed() {
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..100 {
            let breaker = Arc::clone(&breaker);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _ = breaker
                    .call(|| async {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(())
                    })
                    .await;
            }));
        }

        for handle in handles {
            handle.await.ok();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
