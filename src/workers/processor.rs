use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};
use validator::Validate;

use crate::{
    clients::{
        database::ComplaintStore, dead_letter::DeadLetterSink, queue::QueueClient,
        topic::TopicClient,
    },
    error::{PolicyError, QueueError},
    models::{
        complaint::{ComplaintSubmission, NewComplaint},
        event::ProcessedEvent,
        message::QueueMessage,
        outcome::{MessageOutcome, Stage},
    },
    policy::ResiliencePolicy,
    utils::idempotency_key,
    workers::{MessageHandler, PollSettings, poll_once, run_worker},
};

/// Turns queued complaint submissions into stored complaints and `ComplaintProcessed` events.
///
/// A message is deleted only once the complaint is stored and the event published, or when
/// its body can never be processed.
pub struct ComplaintProcessor {
    queue: Arc<dyn QueueClient>,
    topic: Arc<dyn TopicClient>,
    store: Arc<dyn ComplaintStore>,
    db_policy: ResiliencePolicy,
    topic_policy: ResiliencePolicy,
    dead_letters: Arc<dyn DeadLetterSink>,
    settings: PollSettings,
}

impl ComplaintProcessor {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        topic: Arc<dyn TopicClient>,
        store: Arc<dyn ComplaintStore>,
        db_policy: ResiliencePolicy,
        topic_policy: ResiliencePolicy,
        dead_letters: Arc<dyn DeadLetterSink>,
        settings: PollSettings,
    ) -> Self {
        Self {
            queue,
            topic,
            store,
            db_policy,
            topic_policy,
            dead_letters,
            settings,
        }
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

    async fn give_up<E: std::fmt::Display>(
        &self,
        message: &QueueMessage,
        stage: Stage,
        error: PolicyError<E>,
    ) -> MessageOutcome {
        let reason = error.to_string();
        self.dead_letters.on_exhausted(message, stage, &reason).await;
        MessageOutcome::released(stage, reason)
    }
}

/// Parses and validates a queued complaint. The error is the poison reason.
pub fn decode_submission(body: &str) -> Result<ComplaintSubmission, String> {
    if body.trim().is_empty() {
        return Err("message body is empty".to_string());
    }

    let submission: ComplaintSubmission =
        serde_json::from_str(body).map_err(|e| format!("malformed complaint: {}", e))?;

    submission
        .validate()
        .map_err(|e| format!("invalid complaint: {}", e))?;

    Ok(submission)
}

#[async_trait]
impl MessageHandler for ComplaintProcessor {
    fn name(&self) -> &'static str {
        "complaint-processor"
    }

    fn queue(&self) -> &dyn QueueClient {
        self.queue.as_ref()
    }

    fn settings(&self) -> &PollSettings {
        &self.settings
    }

    async fn handle_message(&self, message: &QueueMessage) -> MessageOutcome {
        let submission = match decode_submission(&message.body) {
            Ok(submission) => submission,
            Err(reason) => return self.poison(message, reason).await,
        };

        let key = idempotency_key(message);
        debug!(
            message_id = %message.id_for_logs(),
            idempotency_key = %key,
            redelivered = message.redelivered,
            "Processing complaint"
        );

        let complaint = NewComplaint::new(submission, key);
        let persisted = match self
            .db_policy
            .execute(|| self.store.insert(&complaint))
            .await
        {
            Ok(persisted) => persisted,
            Err(e) => return self.give_up(message, Stage::Persist, e).await,
        };

        let event = ProcessedEvent::for_record(&persisted.record);
        let body = match serde_json::to_string(&event) {
            Ok(body) => body,
            Err(e) => return MessageOutcome::released(Stage::Publish, e),
        };
        let attributes = event.attributes();

        if let Err(e) = self
            .topic_policy
            .execute(|| self.topic.publish(&body, &attributes))
            .await
        {
            return self.give_up(message, Stage::Publish, e).await;
        }

        if let Err(e) = self.queue.delete(&message.receipt).await {
            return MessageOutcome::released(Stage::Acknowledge, e);
        }

        info!(
            complaint_id = %persisted.record.id,
            complaint_type = %persisted.record.complaint_type,
            created = persisted.created,
            "Complaint processed"
        );

        MessageOutcome::Completed
    }
}
