use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    clients::{
        dead_letter::DeadLetterSink, notifier::Notifier, queue::QueueClient,
        redis::NotificationLedger,
    },
    error::QueueError,
    models::{
        envelope::TopicEnvelope,
        event::ProcessedEvent,
        message::QueueMessage,
        outcome::{MessageOutcome, Stage},
        status::ClaimStatus,
    },
    policy::ResiliencePolicy,
    workers::{MessageHandler, PollSettings, poll_once, run_worker},
};

/// Sends the customer notification for every `ComplaintProcessed` event delivered by the topic.
pub struct NotificationWorker {
    queue: Arc<dyn QueueClient>,
    notifier: Arc<dyn Notifier>,
    policy: ResiliencePolicy,
    ledger: Option<Arc<dyn NotificationLedger>>,
    dead_letters: Arc<dyn DeadLetterSink>,
    settings: PollSettings,
}

impl NotificationWorker {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        notifier: Arc<dyn Notifier>,
        policy: ResiliencePolicy,
        dead_letters: Arc<dyn DeadLetterSink>,
        settings: PollSettings,
    ) -> Self {
        Self {
            queue,
            notifier,
            policy,
            ledger: None,
            dead_letters,
            settings,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn NotificationLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        run_worker(self, shutdown).await
    }

    pub async fn poll_once(&self) -> Result<Vec<MessageOutcome>, QueueError> {
        poll_once(self).await
    }

    async fn poison(&self, message: &QueueMessage, reason: String) -> MessageOutcome {
        self.dead_letters.on_poison(message, &reason).await;

        match self.queue.delete(&message.receipt).await {
            Ok(()) => MessageOutcome::poisoned(reason),
            Err(e) => MessageOutcome::released(Stage::Acknowledge, e),
        }
    }

    async fn acknowledge(&self, message: &QueueMessage) -> MessageOutcome {
        match self.queue.delete(&message.receipt).await {
            Ok(()) => MessageOutcome::Completed,
            Err(e) => MessageOutcome::released(Stage::Acknowledge, e),
        }
    }

    /// `Ok(false)` means it was already sent and the message only needs acknowledging.
    async fn claim(&self, event: &ProcessedEvent) -> Result<bool, MessageOutcome> {
        let Some(ledger) = &self.ledger else {
            return Ok(true);
        };

        match ledger.claim(event.complaint_id).await {
            Ok(ClaimStatus::Acquired) => Ok(true),
            Ok(ClaimStatus::AlreadySent) => {
                info!(complaint_id = %event.complaint_id, "Notification already sent, skipping");
                Ok(false)
            }
            Ok(ClaimStatus::InProgress) => Err(MessageOutcome::released(
                Stage::Notify,
                "notification is being sent by another worker",
            )),
            Err(e) => {
                warn!(
                    complaint_id = %event.complaint_id,
                    error = %e,
                    "Notification ledger unavailable, sending without deduplication"
                );
                Ok(true)
            }
        }
    }
}

/// Unwraps the topic envelope and decodes the event inside. The error is the poison reason.
pub fn decode_event(body: &str) -> Result<ProcessedEvent, String> {
    if body.trim().is_empty() {
        return Err("message body is empty".to_string());
    }

    let envelope: TopicEnvelope =
        serde_json::from_str(body).map_err(|e| format!("malformed envelope: {}", e))?;

    if envelope.message.trim().is_empty() {
        return Err("envelope carries no message".to_string());
    }

    serde_json::from_str(&envelope.message).map_err(|e| format!("malformed event: {}", e))
}

#[async_trait]
impl MessageHandler for NotificationWorker {
    fn name(&self) -> &'static str {
        "notification-worker"
    }

    fn queue(&self) -> &dyn QueueClient {
        self.queue.as_ref()
    }

    fn settings(&self) -> &PollSettings {
        &self.settings
    }

    async fn handle_message(&self, message: &QueueMessage) -> MessageOutcome {
        let event = match decode_event(&message.body) {
            Ok(event) => event,
            Err(reason) => return self.poison(message, reason).await,
        };

        debug!(
            message_id = %message.id_for_logs(),
            complaint_id = %event.complaint_id,
            "Handling processed complaint event"
        );

        match self.claim(&event).await {
            Ok(true) => {}
            Ok(false) => return self.acknowledge(message).await,
            Err(outcome) => return outcome,
        }

        if let Err(e) = self
            .policy
            .execute(|| self.notifier.notify(&event))
            .await
        {
            if let Some(ledger) = &self.ledger {
                if let Err(release_err) = ledger.release(event.complaint_id).await {
                    warn!(
                        complaint_id = %event.complaint_id,
                        error = %release_err,
                        "Failed to release notification claim"
                    );
                }
            }

            let reason = e.to_string();
            if !e.is_circuit_open() {
                self.dead_letters
                    .on_exhausted(message, Stage::Notify, &reason)
                    .await;
            }
            return MessageOutcome::released(Stage::Notify, reason);
        }

        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.mark_sent(event.complaint_id).await {
                warn!(
                    complaint_id = %event.complaint_id,
                    error = %e,
                    "Failed to record sent notification"
                );
            }
        }

        info!(complaint_id = %event.complaint_id, "Customer notified");

        self.acknowledge(message).await
    }
}
