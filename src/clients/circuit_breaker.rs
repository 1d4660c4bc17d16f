use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    error::PolicyError,
    models::circuit_breaker::{CircuitBreakerConfig, CircuitState},
    policy::{NoopObserver, ResilienceObserver},
};

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Consecutive-failure circuit breaker shared by every invocation of one worker.
///
/// The lock is only held while reading or updating counters, never across the wrapped call.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    observer: Arc<dyn ResilienceObserver>,
}

enum Admission {
    Normal,
    Trial,
}

/// Frees the half-open slot if a trial call is dropped before it settles.
struct TrialPermit<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            open_secs = config.open_duration.as_secs(),
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state as callers would see it; an expired open window reads as half-open.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        let state = inner.state;
        match state {
            CircuitState::Open if self.cool_down_elapsed(&inner) => CircuitState::HalfOpen,
            _ => state,
        }
    }

    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, PolicyError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PolicyError<E>>>,
    {
        let admission = self.admit()?;
        let mut permit = TrialPermit {
            breaker: self,
            armed: matches!(admission, Admission::Trial),
        };

        let result = operation().await;
        permit.armed = false;

        match result {
            Ok(result) => {
                self.record_success(admission);
                Ok(result)
            }
            Err(e) => {
                self.record_failure(admission);
                Err(e)
            }
        }
    }

    fn admit<E>(&self) -> Result<Admission, PolicyError<E>> {
        let mut inner = self.lock();
        let state = inner.state;

        match state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open if self.cool_down_elapsed(&inner) => {
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.trial_in_flight = true;
                info!(breaker = %self.name, "Circuit breaker letting a trial call through");
                Ok(Admission::Trial)
            }
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Ok(Admission::Trial)
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                let retry_after = self.remaining_cool_down(&inner);
                warn!(breaker = %self.name, ?retry_after, "Circuit breaker is open, rejecting call");
                Err(PolicyError::CircuitOpen {
                    policy: self.name.clone(),
                    retry_after,
                })
            }
        }
    }

    fn record_success(&self, admission: Admission) {
        let mut inner = self.lock();

        if let Admission::Trial = admission {
            inner.trial_in_flight = false;
            self.transition(&mut inner, CircuitState::Closed);
            inner.opened_at = None;
            info!(breaker = %self.name, "Circuit breaker closed after successful trial");
        } else if inner.state == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
    }

    fn record_failure(&self, admission: Admission) {
        let mut inner = self.lock();

        if let Admission::Trial = admission {
            inner.trial_in_flight = false;
            inner.opened_at = Some(Instant::now());
            self.transition(&mut inner, CircuitState::Open);
            warn!(breaker = %self.name, "Circuit breaker reopened after failed trial");
            return;
        }

        // A call admitted while closed may finish after another caller already opened it.
        if inner.state != CircuitState::Closed {
            return;
        }

        inner.consecutive_failures += 1;
        debug!(
            breaker = %self.name,
            failures = inner.consecutive_failures,
            threshold = self.config.failure_threshold,
            "Circuit breaker failure recorded"
        );

        if inner.consecutive_failures >= self.config.failure_threshold {
            inner.opened_at = Some(Instant::now());
            self.transition(&mut inner, CircuitState::Open);
            warn!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                open_secs = self.config.open_duration.as_secs(),
                "Circuit breaker opened due to consecutive failures"
            );
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }

        inner.state = to;
        if to == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
        self.observer.on_circuit_transition(&self.name, from, to);
    }

    fn cool_down_elapsed(&self, inner: &BreakerState) -> bool {
        inner
            .opened_at
            .is_none_or(|at| at.elapsed() >= self.config.open_duration)
    }

    fn remaining_cool_down(&self, inner: &BreakerState) -> Duration {
        inner
            .opened_at
            .map(|at| self.config.open_duration.saturating_sub(at.elapsed()))
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
