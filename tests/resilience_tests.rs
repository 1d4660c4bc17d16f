use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use complaint_pipeline::{
    clients::circuit_breaker::CircuitBreaker,
    error::{PolicyError, StoreError},
    models::{
        circuit_breaker::{CircuitBreakerConfig, CircuitState},
        retry::RetryConfig,
    },
    policy::ResiliencePolicy,
};
use tokio::time::Instant;

use crate::support::CountingObserver;

fn transient() -> StoreError {
    StoreError::Unavailable("connection reset".to_string())
}

/// Runs an operation that fails transiently `failures` times before succeeding.
async fn run_flaky(
    policy: &ResiliencePolicy,
    failures: u32,
    calls: &Arc<AtomicU32>,
) -> Result<&'static str, PolicyError<StoreError>> {
    policy
        .execute(|| {
            let calls = Arc::clone(calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    Err(transient())
                } else {
                    Ok("stored")
                }
            }
        })
        .await
}

/// Test: Transient failures are retried and each retry is observable
#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_with_linear_backoff() -> Result<()> {
    let observer = CountingObserver::new();
    let policy = ResiliencePolicy::new("database", RetryConfig::linear(4, Duration::from_secs(1)))
        .with_observer(observer.clone());
    let calls = Arc::new(AtomicU32::new(0));

    let start = Instant::now();
    let result = run_flaky(&policy, 2, &calls).await?;

    assert_eq!(result, "stored");
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let retries = observer.retries();
    assert_eq!(retries.len(), 2);
    assert_eq!(retries[0], ("database".to_string(), 1, Duration::from_secs(1)));
    assert_eq!(retries[1], ("database".to_string(), 2, Duration::from_secs(2)));
    assert!(start.elapsed() >= Duration::from_secs(3));

    Ok(())
}

/// Test: Fewer than R failures succeed, R or more exhaust the policy
#[tokio::test(start_paused = true)]
async fn test_policy_gives_up_after_max_attempts() -> Result<()> {
    let policy = ResiliencePolicy::new(
        "database",
        RetryConfig::exponential(4, Duration::from_secs(1), Duration::from_secs(30)),
    );

    for failures in 0..4 {
        let calls = Arc::new(AtomicU32::new(0));
        assert!(run_flaky(&policy, failures, &calls).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), failures + 1);
    }

    for failures in 4..7 {
        let calls = Arc::new(AtomicU32::new(0));
        let err = run_flaky(&policy, failures, &calls).await.unwrap_err();

        assert!(matches!(err, PolicyError::Exhausted { attempts: 4, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    Ok(())
}

/// Test: Exponential delays double between attempts
#[tokio::test(start_paused = true)]
async fn test_exponential_schedule_is_observed() -> Result<()> {
    let observer = CountingObserver::new();
    let policy = ResiliencePolicy::new(
        "database",
        RetryConfig::exponential(4, Duration::from_secs(1), Duration::from_secs(30)),
    )
    .with_observer(observer.clone());
    let calls = Arc::new(AtomicU32::new(0));

    let _ = run_flaky(&policy, 10, &calls).await;

    let delays: Vec<Duration> = observer.retries().into_iter().map(|(_, _, d)| d).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8)
        ]
    );

    Ok(())
}

/// Test: Non-retryable errors stop immediately
#[tokio::test]
async fn test_fatal_errors_are_not_retried() -> Result<()> {
    let observer = CountingObserver::new();
    let policy = ResiliencePolicy::new("database", RetryConfig::linear(4, Duration::from_secs(1)))
        .with_observer(observer.clone());
    let calls = Arc::new(AtomicU32::new(0));

    let err = policy
        .execute(|| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StoreError::Constraint("duplicate key".to_string()))
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, PolicyError::Fatal { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(observer.retries().is_empty());

    Ok(())
}

/// Test: A custom classifier overrides the error's own classification
#[tokio::test]
async fn test_custom_classifier_is_respected() -> Result<()> {
    let policy = ResiliencePolicy::new("custom", RetryConfig::linear(3, Duration::from_millis(1)));
    let calls = Arc::new(AtomicU32::new(0));

    let err = policy
        .execute_with(
            |_: &String| false,
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("nope".to_string())
                }
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PolicyError::Fatal { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: The breaker counts logical calls, not individual retry attempts
#[tokio::test(start_paused = true)]
async fn test_breaker_wraps_the_whole_retry_loop() -> Result<()> {
    let observer = CountingObserver::new();
    let breaker = Arc::new(
        CircuitBreaker::new(
            "notification",
            CircuitBreakerConfig {
                failure_threshold: 2,
                open_duration: Duration::from_secs(30),
            },
        )
        .with_observer(observer.clone()),
    );
    let policy = ResiliencePolicy::new("notification", RetryConfig::linear(3, Duration::from_secs(1)))
        .with_circuit_breaker(Arc::clone(&breaker));

    let calls = Arc::new(AtomicU32::new(0));

    assert!(run_flaky(&policy, u32::MAX, &calls).await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(policy.circuit_state(), Some(CircuitState::Closed));

    assert!(run_flaky(&policy, u32::MAX, &calls).await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert_eq!(policy.circuit_state(), Some(CircuitState::Open));

    let rejected = run_flaky(&policy, 0, &calls).await.unwrap_err();
    assert!(rejected.is_circuit_open());
    assert_eq!(calls.load(Ordering::SeqCst), 6, "open circuit must not invoke the action");

    tokio::time::advance(Duration::from_secs(30)).await;

    let trial_calls = Arc::new(AtomicU32::new(0));
    assert!(run_flaky(&policy, 0, &trial_calls).await.is_ok());
    assert_eq!(breaker.state(), CircuitState::Closed);

    assert_eq!(
        observer.transitions(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );

    Ok(())
}

/// Test: Only one trial call is admitted while half-open
#[tokio::test(start_paused = true)]
async fn test_half_open_admits_a_single_trial() -> Result<()> {
    let breaker = Arc::new(CircuitBreaker::new(
        "notification",
        CircuitBreakerConfig {
            failure_threshold: 1,
            open_duration: Duration::from_secs(5),
        },
    ));
    let policy = ResiliencePolicy::new("notification", RetryConfig::linear(1, Duration::ZERO))
        .with_circuit_breaker(Arc::clone(&breaker));

    let calls = Arc::new(AtomicU32::new(0));
    let _ = run_flaky(&policy, u32::MAX, &calls).await;
    tokio::time::advance(Duration::from_secs(5)).await;

    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let trial_policy = policy.clone();
    let trial = tokio::spawn(async move {
        let mut signals = Some((started_tx, release_rx));
        trial_policy
            .execute(|| {
                let signals = signals.take();
                async move {
                    if let Some((started, release)) = signals {
                        let _ = started.send(());
                        let _ = release.await;
                    }
                    Ok::<_, StoreError>(())
                }
            })
            .await
    });

    started_rx.await?;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let concurrent = run_flaky(&policy, 0, &calls).await.unwrap_err();
    assert!(concurrent.is_circuit_open());

    let _ = release_tx.send(());
    trial.await??;
    assert_eq!(breaker.state(), CircuitState::Closed);

    Ok(())
}
