//! # Circuit Breaker Implementation
//!
//! Classic three-state breaker: Closed (normal operation), Open (failing fast) and
//! Half-Open (letting a limited number of trial calls through to test recovery).

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - limited calls allowed to test system health
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Counters kept by one breaker
#[derive(Debug, Clone, Default, Serialize)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Calls rejected while open
    pub rejected_count: u64,
    pub consecutive_failures: u64,
    pub half_open_successes: u64,
}

#[derive(Debug, Default)]
struct BreakerInner {
    metrics: CircuitBreakerMetrics,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    state: AtomicU8,
    enabled: bool,
    failure_threshold: u64,
    success_threshold: u64,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::with_timeout(name, config, config.timeout())
    }

    /// Same as [`CircuitBreaker::new`] with a sub-second open timeout
    pub fn with_timeout(
        name: impl Into<String>,
        config: &CircuitBreakerConfig,
        timeout: Duration,
    ) -> Self {
        let name = name.into();
        info!(
            component = %name,
            enabled = config.enabled,
            failure_threshold = config.failure_threshold,
            timeout_ms = timeout.as_millis() as u64,
            success_threshold = config.success_threshold,
            "Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            enabled: config.enabled,
            failure_threshold: u64::from(config.failure_threshold.max(1)),
            success_threshold: u64::from(config.success_threshold.max(1)),
            timeout,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.enabled {
            return operation().await.map_err(CircuitBreakerError::OperationFailed);
        }

        if !self.should_allow_call() {
            self.inner.lock().metrics.rejected_count += 1;
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        }

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => self.record_success(duration),
            Err(_) => self.record_failure(duration),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Whether a call would currently be let through
    pub fn should_allow_call(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .inner
                    .lock()
                    .opened_at
                    .map(|opened| opened.elapsed() >= self.timeout);
                match elapsed {
                    Some(true) => {
                        self.transition_to_half_open();
                        true
                    }
                    Some(false) => false,
                    None => {
                        warn!(component = %self.name, "Circuit open but no timestamp recorded");
                        true
                    }
                }
            }
            CircuitState::HalfOpen => {
                self.inner.lock().metrics.half_open_successes < self.success_threshold
            }
        }
    }

    fn record_success(&self, duration: Duration) {
        let close = {
            let mut inner = self.inner.lock();
            let metrics = &mut inner.metrics;
            metrics.total_calls += 1;
            metrics.success_count += 1;
            metrics.consecutive_failures = 0;

            debug!(
                component = %self.name,
                duration_ms = duration.as_millis() as u64,
                "Operation succeeded"
            );

            if self.state() == CircuitState::HalfOpen {
                metrics.half_open_successes += 1;
                metrics.half_open_successes >= self.success_threshold
            } else {
                false
            }
        };

        if close {
            self.transition_to_closed();
        }
    }

    fn record_failure(&self, duration: Duration) {
        let open = {
            let mut inner = self.inner.lock();
            let metrics = &mut inner.metrics;
            metrics.total_calls += 1;
            metrics.failure_count += 1;
            metrics.consecutive_failures += 1;

            warn!(
                component = %self.name,
                duration_ms = duration.as_millis() as u64,
                consecutive_failures = metrics.consecutive_failures,
                "Operation failed"
            );

            match self.state() {
                CircuitState::Closed => metrics.consecutive_failures >= self.failure_threshold,
                // Any failure while probing reopens the circuit
                CircuitState::HalfOpen => true,
                CircuitState::Open => false,
            }
        };

        if open {
            self.transition_to_open();
        }
    }

    fn transition_to_closed(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        let mut inner = self.inner.lock();
        inner.metrics.consecutive_failures = 0;
        inner.metrics.half_open_successes = 0;
        inner.opened_at = None;

        info!(
            component = %self.name,
            total_calls = inner.metrics.total_calls,
            "Circuit breaker closed (recovered)"
        );
    }

    fn transition_to_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        let mut inner = self.inner.lock();
        inner.opened_at = Some(Instant::now());
        inner.metrics.half_open_successes = 0;

        warn!(
            component = %self.name,
            consecutive_failures = inner.metrics.consecutive_failures,
            failure_threshold = self.failure_threshold,
            timeout_ms = self.timeout.as_millis() as u64,
            "Circuit breaker opened (failing fast)"
        );
    }

    fn transition_to_half_open(&self) {
        self.state.store(CircuitState::HalfOpen as u8, Ordering::Release);
        self.inner.lock().metrics.half_open_successes = 0;

        info!(
            component = %self.name,
            success_threshold = self.success_threshold,
            "Circuit breaker half-open (testing recovery)"
        );
    }

    /// Force circuit to open state
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        self.transition_to_open();
    }

    /// Force circuit to closed state
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        self.transition_to_closed();
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.inner.lock().metrics.clone()
    }
}
