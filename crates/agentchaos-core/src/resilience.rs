//! Circuit breaker for fail-open behavior
//!
//! Keeps a repeatedly failing operation from being retried on every flow: the
//! circuit opens after `fail_max` consecutive failures and admits a single
//! probe call once `reset_timeout` has elapsed.

use crate::error::ChaosError;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Circuit is open, calls are bypassed
    Open,
    /// Testing whether the operation recovered
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
}

/// Circuit breaker with CLOSED / OPEN / HALF_OPEN states.
///
/// Transitions:
/// - CLOSED → OPEN once `failure_count` reaches `fail_max`
/// - OPEN → HALF_OPEN after `reset_timeout` has elapsed
/// - HALF_OPEN → CLOSED on the next success, back to OPEN on the next failure
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    fail_max: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, fail_max: u32, reset_timeout: Duration) -> Self {
        let name = name.into();
        debug!(
            "CircuitBreaker '{}' initialized: fail_max={}, reset_timeout={:?}",
            name, fail_max, reset_timeout
        );
        Self {
            name,
            fail_max,
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
            }),
        }
    }

    /// Breaker with the default strategy policy: 5 failures, 60s reset.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, 5, Duration::from_secs(60))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fail_max(&self) -> u32 {
        self.fail_max
    }

    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// Current state (thread-safe read, no transitions).
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Current consecutive-failure count.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Decide whether a call may proceed, applying the OPEN → HALF_OPEN
    /// transition when the reset timeout has elapsed.
    pub fn allow_call(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.last_failure_time.map(|t| t.elapsed());
                match elapsed {
                    Some(elapsed) if elapsed >= self.reset_timeout => {
                        inner.state = CircuitState::HalfOpen;
                        inner.failure_count = 0;
                        info!(
                            "CircuitBreaker '{}': transitioning to HALF_OPEN (elapsed: {:.1}s)",
                            self.name,
                            elapsed.as_secs_f64()
                        );
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    /// Record a successful call. Closes the circuit from HALF_OPEN and zeroes
    /// the failure count.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                info!("CircuitBreaker '{}': recovered, transitioning to CLOSED", self.name);
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call. Returns true when this failure opened the
    /// circuit (edge-triggered, fires once per transition).
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure_time = Some(Instant::now());

        if inner.failure_count >= self.fail_max && inner.state != CircuitState::Open {
            inner.state = CircuitState::Open;
            warn!(
                "CircuitBreaker '{}': opening circuit after {} failures, retrying in {:?}",
                self.name, self.fail_max, self.reset_timeout
            );
            return true;
        }
        false
    }

    /// Execute `f` through the breaker.
    ///
    /// CLOSED and HALF_OPEN call `f` and observe the outcome; OPEN returns
    /// [`ChaosError::CircuitBreakerOpen`] without calling.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, ChaosError>
    where
        F: FnOnce() -> Result<T, E>,
        E: Into<ChaosError>,
    {
        if !self.allow_call() {
            return Err(ChaosError::CircuitBreakerOpen(self.name.clone()));
        }
        match f() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e.into())
            }
        }
    }

    /// Manually reset to CLOSED. Useful for tests and manual recovery.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_time = None;
        info!("CircuitBreaker '{}': manually reset to CLOSED", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing() -> Result<(), ChaosError> {
        Err(ChaosError::Strategy("boom".into()))
    }

    #[test]
    fn test_starts_closed() {
        let breaker = CircuitBreaker::with_defaults("test");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_opens_after_fail_max() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(60));

        for i in 0..3 {
            let opened = breaker.record_failure();
            assert_eq!(opened, i == 2, "only the threshold failure opens the circuit");
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Further failures do not re-trigger the edge
        assert!(!breaker.record_failure());
    }

    #[test]
    fn test_open_rejects_without_calling() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_secs(60));
        let _ = breaker.call(failing);
        assert_eq!(breaker.state(), CircuitState::Open);

        let mut called = false;
        let result = breaker.call(|| -> Result<(), ChaosError> {
            called = true;
            Ok(())
        });
        assert!(matches!(result, Err(ChaosError::CircuitBreakerOpen(_))));
        assert!(!called);
    }

    #[test]
    fn test_half_open_after_timeout_then_closes_on_success() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(0));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Zero timeout: next admission check moves to half-open
        assert!(breaker.allow_call());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(0));
        breaker.record_failure();
        assert!(breaker.allow_call());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failure_count_when_closed() {
        let breaker = CircuitBreaker::new("test", 5, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.failure_count(), 2);
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_manual_reset() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_secs(60));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }
}
