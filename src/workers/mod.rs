//! Queue-driven workers.
//!
//! Both workers share one polling loop: long-poll a batch, settle every message
//! independently, repeat until shutdown. What differs is how a single message is handled,
//! which each worker provides through [`MessageHandler`].

pub mod notification;
pub mod processor;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use tokio::{sync::watch, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    clients::queue::QueueClient,
    error::QueueError,
    models::{
        message::QueueMessage,
        outcome::{MessageOutcome, Stage},
    },
};

const RECEIVE_BACKOFF_BASE: Duration = Duration::from_secs(1);
const RECEIVE_BACKOFF_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub batch_size: usize,
    pub wait: Duration,
    /// Messages of one batch handled at the same time. `1` handles them in order.
    pub concurrency: usize,
}

impl PollSettings {
    pub fn new(batch_size: usize, wait: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            wait,
            concurrency: 1,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn queue(&self) -> &dyn QueueClient;

    fn settings(&self) -> &PollSettings;

    /// Settles one message. Never fails: every error ends up in the returned outcome.
    async fn handle_message(&self, message: &QueueMessage) -> MessageOutcome;
}

/// Receives one batch and settles every message in it.
pub async fn poll_once<H>(handler: &H) -> Result<Vec<MessageOutcome>, QueueError>
where
    H: MessageHandler + ?Sized,
{
    let settings = handler.settings();
    let messages = handler
        .queue()
        .receive(settings.batch_size, settings.wait)
        .await?;

    Ok(settle_batch(handler, messages).await)
}

async fn settle_batch<H>(handler: &H, messages: Vec<QueueMessage>) -> Vec<MessageOutcome>
where
    H: MessageHandler + ?Sized,
{
    if messages.is_empty() {
        return Vec::new();
    }

    debug!(worker = handler.name(), count = messages.len(), "Received batch");

    let concurrency = handler.settings().concurrency;
    if concurrency <= 1 {
        let mut outcomes = Vec::with_capacity(messages.len());
        for message in &messages {
            outcomes.push(settle(handler, message).await);
        }
        return outcomes;
    }

    let pending: Vec<_> = messages.iter().map(|message| settle(handler, message)).collect();
    stream::iter(pending)
        .buffer_unordered(concurrency)
        .collect()
        .await
}

async fn settle<H>(handler: &H, message: &QueueMessage) -> MessageOutcome
where
    H: MessageHandler + ?Sized,
{
    // A message whose receipt lapsed while earlier ones were handled is already back on
    // the queue.
    let outcome = if handler.queue().is_receipt_live(&message.receipt) {
        handler.handle_message(message).await
    } else {
        MessageOutcome::released(Stage::Acknowledge, "visibility timeout lapsed before handling")
    };

    match &outcome {
        MessageOutcome::Completed => {
            debug!(worker = handler.name(), message_id = %message.id_for_logs(), "Message completed");
        }
        MessageOutcome::Poisoned { reason } => {
            warn!(worker = handler.name(), message_id = %message.id_for_logs(), reason, "Message poisoned");
        }
        MessageOutcome::Released { stage, reason } => {
            warn!(
                worker = handler.name(),
                message_id = %message.id_for_logs(),
                %stage,
                reason,
                "Message left for redelivery"
            );
        }
    }

    outcome
}

/// Polls until `shutdown` flips to `true` or its sender is dropped.
///
/// Receive errors back off exponentially and never end the loop. A batch already received
/// is always settled before the loop looks at the shutdown signal again.
pub async fn run_worker<H>(handler: &H, mut shutdown: watch::Receiver<bool>)
where
    H: MessageHandler + ?Sized,
{
    let settings = handler.settings();
    info!(
        worker = handler.name(),
        queue = %handler.queue().name(),
        batch_size = settings.batch_size,
        wait_secs = settings.wait.as_secs(),
        concurrency = settings.concurrency,
        "Starting worker"
    );

    let mut consecutive_errors: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let received = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            received = handler.queue().receive(settings.batch_size, settings.wait) => received,
        };

        match received {
            Ok(messages) => {
                if consecutive_errors > 0 {
                    info!(worker = handler.name(), consecutive_errors, "Queue recovered");
                    consecutive_errors = 0;
                }
                settle_batch(handler, messages).await;
            }
            Err(e) => {
                consecutive_errors += 1;
                let backoff = receive_backoff(consecutive_errors);
                error!(
                    worker = handler.name(),
                    error = %e,
                    consecutive_errors,
                    backoff_secs = backoff.as_secs(),
                    "Failed to receive messages, backing off"
                );

                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = sleep(backoff) => {}
                }
            }
        }
    }

    info!(worker = handler.name(), "Worker stopped");
}

fn receive_backoff(consecutive_errors: u32) -> Duration {
    let exponent = consecutive_errors.saturating_sub(1).min(16);
    RECEIVE_BACKOFF_BASE
        .saturating_mul(2u32.pow(exponent))
        .min(RECEIVE_BACKOFF_MAX)
}
