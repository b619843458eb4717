//! Circuit breaker around outbound supervisory calls.
//!
//! Three states -- `Closed`, `Open`, `HalfOpen` -- tracked in a small
//! `parking_lot::Mutex`-guarded struct, matching the teacher's
//! preference for `parking_lot` over `std::sync::Mutex` throughout
//! `plantd-core`. `N` consecutive failures while `Closed` trip the
//! breaker to `Open`; after `reset_timeout` the next call attempt is
//! allowed through as a probe (`HalfOpen`) -- success closes the
//! breaker again, failure re-opens it.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use plantd_core::error::PlantdError;

/// Observable state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through normally.
    Closed,
    /// Calls fail fast with [`PlantdError::CircuitOpen`].
    Open,
    /// The breaker has elapsed its reset timeout; the next call is a trial.
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Wraps any outbound call with failure-triggered fail-fast behavior.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    reset_timeout: Duration,
    name: String,
}

impl CircuitBreaker {
    /// Construct a breaker that opens after `threshold` consecutive
    /// failures and attempts a trial call `reset_timeout` after opening.
    #[must_use]
    pub fn new(name: impl Into<String>, threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            threshold: threshold.max(1),
            reset_timeout,
            name: name.into(),
        }
    }

    /// Current state, without advancing it.
    ///
    /// Note this is a snapshot: an `Open` breaker whose `reset_timeout`
    /// has already elapsed still reports `Open` here -- the transition
    /// to `HalfOpen` happens lazily, at the next [`CircuitBreaker::call`].
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run `f` through the breaker.
    ///
    /// Fails fast with `CircuitOpen` without calling `f` at all when
    /// the breaker is open and its reset timeout has not yet elapsed.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, PlantdError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PlantdError>>,
    {
        self.admit()?;

        match f().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }

    fn admit(&self) -> Result<(), PlantdError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.opened_at.is_some_and(|t| t.elapsed() >= self.reset_timeout);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(PlantdError::CircuitOpen(self.name.clone()))
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fail() -> Result<(), PlantdError> {
        Err(PlantdError::internal("boom"))
    }

    async fn succeed() -> Result<(), PlantdError> {
        Ok(())
    }

    #[compio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new("dep", 2, Duration::from_millis(50));

        assert!(breaker.call(fail).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Closed);

        assert!(breaker.call(fail).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = breaker.call(succeed).await.unwrap_err();
        assert!(matches!(err, PlantdError::CircuitOpen(_)));
    }

    #[compio::test]
    async fn half_open_trial_closes_on_success() {
        let breaker = CircuitBreaker::new("dep", 1, Duration::from_millis(20));

        assert!(breaker.call(fail).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        compio::time::sleep(Duration::from_millis(30)).await;

        assert!(breaker.call(succeed).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[compio::test]
    async fn half_open_trial_reopens_on_failure() {
        let breaker = CircuitBreaker::new("dep", 1, Duration::from_millis(20));

        assert!(breaker.call(fail).await.is_err());
        compio::time::sleep(Duration::from_millis(30)).await;

        assert!(breaker.call(fail).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
