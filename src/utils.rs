use std::{fmt::Display, future::Future};

use sha2::{Digest, Sha256};
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::{
    error::PolicyError,
    models::{message::QueueMessage, retry::RetryConfig},
    policy::{ResilienceObserver, RetryEvent},
};

/// Runs `operation` until it succeeds, fails with an error `is_transient` rejects, or
/// `max_attempts` invocations have been spent.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    policy: &str,
    is_transient: C,
    observer: &dyn ResilienceObserver,
    mut operation: F,
) -> Result<T, PolicyError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    C: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(policy, attempt, max_attempts, "Retry succeeded");
                }
                return Ok(result);
            }
            Err(e) if !is_transient(&e) => {
                warn!(policy, attempt, error = %e, "Non-retryable failure, giving up");
                return Err(PolicyError::Fatal {
                    policy: policy.to_string(),
                    source: e,
                });
            }
            Err(e) => {
                if attempt >= max_attempts {
                    warn!(
                        policy,
                        max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(PolicyError::Exhausted {
                        policy: policy.to_string(),
                        attempts: attempt,
                        source: e,
                    });
                }

                let delay = jittered(config, config.backoff.delay(attempt));

                warn!(
                    policy,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, backing off"
                );

                observer.on_retry(&RetryEvent {
                    policy,
                    attempt,
                    delay,
                    error: e.to_string(),
                });

                sleep(delay).await;
            }
        }
    }
}

fn jittered(config: &RetryConfig, delay: Duration) -> Duration {
    if !config.jitter || delay.is_zero() {
        return delay;
    }

    let jitter: f64 = rand::random_range(-0.1..=0.1);
    delay.mul_f64(1.0 + jitter)
}

/// Stable key for a queue message, used to make persistence idempotent across redeliveries.
///
/// Prefers the transport's message id; falls back to a hash of the body so a message without
/// one still maps to the same key every time it is delivered.
pub fn idempotency_key(message: &QueueMessage) -> String {
    match message.message_id.as_deref().filter(|id| !id.trim().is_empty()) {
        Some(id) => format!("msg:{}", id),
        None => {
            let digest = Sha256::digest(message.body.as_bytes());
            debug!("Message has no id, deriving idempotency key from body");
            format!("sha256:{:x}", digest)
        }
    }
}
