use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, warn};

use crate::{
    clients::queue::QueueClient,
    models::{
        message::{DeadLetter, QueueMessage},
        outcome::Stage,
    },
};

/// Hook for messages a worker gives up on. Implementations must not fail the caller.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// The body can never be processed and has been (or is about to be) deleted.
    async fn on_poison(&self, message: &QueueMessage, reason: &str);

    /// Retries at `stage` ran out; the message stays on the queue for redelivery.
    async fn on_exhausted(&self, message: &QueueMessage, stage: Stage, reason: &str);
}

pub struct LogDeadLetters;

#[async_trait]
impl DeadLetterSink for LogDeadLetters {
    async fn on_poison(&self, message: &QueueMessage, reason: &str) {
        error!(
            message_id = %message.id_for_logs(),
            reason,
            body_len = message.body.len(),
            "Dropping poison message"
        );
    }

    async fn on_exhausted(&self, message: &QueueMessage, stage: Stage, reason: &str) {
        warn!(
            message_id = %message.id_for_logs(),
            %stage,
            reason,
            "Retries exhausted, leaving message for redelivery"
        );
    }
}

/// Copies poison messages to a dead-letter queue. Exhaustion is only logged since the
/// message will be redelivered anyway.
pub struct QueueDeadLetters {
    source_queue: String,
    target: Arc<dyn QueueClient>,
}

impl QueueDeadLetters {
    pub fn new(source_queue: impl Into<String>, target: Arc<dyn QueueClient>) -> Self {
        Self {
            source_queue: source_queue.into(),
            target,
        }
    }

    fn letter(&self, message: &QueueMessage, stage: Stage, reason: &str) -> DeadLetter {
        DeadLetter {
            source_queue: self.source_queue.clone(),
            message_id: message.message_id.clone(),
            body: message.body.clone(),
            reason: reason.to_string(),
            stage,
            failed_at: Utc::now().to_rfc3339(),
        }
    }
}

#[async_trait]
impl DeadLetterSink for QueueDeadLetters {
    async fn on_poison(&self, message: &QueueMessage, reason: &str) {
        LogDeadLetters.on_poison(message, reason).await;

        let letter = self.letter(message, Stage::Decode, reason);
        let body = match serde_json::to_string(&letter) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to serialize dead letter");
                return;
            }
        };

        if let Err(e) = self.target.send(&body).await {
            error!(
                message_id = %message.id_for_logs(),
                dead_letter_queue = %self.target.name(),
                error = %e,
                "Failed to publish dead letter"
            );
        }
    }

    async fn on_exhausted(&self, message: &QueueMessage, stage: Stage, reason: &str) {
        LogDeadLetters.on_exhausted(message, stage, reason).await;
    }
}
