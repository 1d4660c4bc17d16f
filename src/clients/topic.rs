use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::TopicError;

/// Publish side of a fan-out topic. Subscribers receive each body wrapped in a
/// [`TopicEnvelope`](crate::models::envelope::TopicEnvelope).
#[async_trait]
pub trait TopicClient: Send + Sync {
    async fn publish(
        &self,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String, TopicError>;
}
