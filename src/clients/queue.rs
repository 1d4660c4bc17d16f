use std::time::Duration;

use async_trait::async_trait;

use crate::{
    error::QueueError,
    models::message::{QueueMessage, ReceiptHandle},
};

/// Narrow view of a durable, at-least-once message queue.
///
/// A received message stays invisible to other receivers until it is deleted or its
/// visibility timeout lapses, after which it is delivered again.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Waits up to `wait` for at least one message and returns at most `max_messages`.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Whether `receipt` is still within its visibility timeout. Queues that cannot tell
    /// report `true`.
    fn is_receipt_live(&self, _receipt: &ReceiptHandle) -> bool {
        true
    }

    /// Enqueues `body` and returns the id the queue assigned to it.
    async fn send(&self, body: &str) -> Result<String, QueueError>;

    fn name(&self) -> &str;
}
