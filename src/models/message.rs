use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::models::outcome::Stage;

/// Opaque token used to delete a received message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle(pub String);

impl Display for ReceiptHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: Option<String>,
    pub body: String,
    pub receipt: ReceiptHandle,
    pub redelivered: bool,
}

impl QueueMessage {
    pub fn id_for_logs(&self) -> &str {
        self.message_id.as_deref().unwrap_or("<none>")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub source_queue: String,
    pub message_id: Option<String>,
    pub body: String,
    pub reason: String,
    pub stage: Stage,
    pub failed_at: String,
}
