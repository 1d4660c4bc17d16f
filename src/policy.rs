//! Composable resilience for calls into external dependencies.
//!
//! A [`ResiliencePolicy`] always retries with backoff; when it carries a [`CircuitBreaker`]
//! the breaker wraps the whole retry loop, so it only sees the final outcome of each
//! logical call and not every attempt.

use std::{fmt::Display, future::Future, sync::Arc, time::Duration};

use crate::{
    clients::circuit_breaker::CircuitBreaker,
    error::{PolicyError, Transient},
    models::{circuit_breaker::CircuitState, retry::RetryConfig},
    utils::retry_with_backoff,
};

#[derive(Debug, Clone)]
pub struct RetryEvent<'a> {
    pub policy: &'a str,
    /// Number of the attempt that just failed.
    pub attempt: u32,
    pub delay: Duration,
    pub error: String,
}

/// Hook for metering retries and breaker transitions. Both are logged regardless.
pub trait ResilienceObserver: Send + Sync {
    fn on_retry(&self, _event: &RetryEvent<'_>) {}

    fn on_circuit_transition(&self, _breaker: &str, _from: CircuitState, _to: CircuitState) {}
}

pub struct NoopObserver;

impl ResilienceObserver for NoopObserver {}

#[derive(Clone)]
pub struct ResiliencePolicy {
    name: String,
    retry: RetryConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    observer: Arc<dyn ResilienceObserver>,
}

impl ResiliencePolicy {
    pub fn new(name: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            name: name.into(),
            retry,
            breaker: None,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.breaker.as_ref().map(|b| b.state())
    }

    /// Runs `operation`, classifying failures through the error's [`Transient`] impl.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, PolicyError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display + Transient,
    {
        self.execute_with(E::is_transient, operation).await
    }

    /// Runs `operation` with an explicit classifier; `is_transient` returning `false` stops
    /// retrying immediately.
    pub async fn execute_with<F, Fut, T, E, C>(
        &self,
        is_transient: C,
        operation: F,
    ) -> Result<T, PolicyError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        C: Fn(&E) -> bool,
    {
        let retried = retry_with_backoff(
            &self.retry,
            &self.name,
            is_transient,
            self.observer.as_ref(),
            operation,
        );

        match &self.breaker {
            Some(breaker) => breaker.call(|| retried).await,
            None => retried.await,
        }
    }
}
