use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::complaint::ComplaintRecord;

pub const COMPLAINT_PROCESSED: &str = "ComplaintProcessed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessedEvent {
    pub complaint_id: Uuid,
    pub customer_email: String,
    pub complaint_type: String,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedEvent {
    pub fn for_record(record: &ComplaintRecord) -> Self {
        Self {
            complaint_id: record.id,
            customer_email: record.customer_email.clone(),
            complaint_type: record.complaint_type.clone(),
            processed_at: Utc::now(),
        }
    }

    pub fn attributes(&self) -> HashMap<String, String> {
        HashMap::from([
            ("event_type".to_string(), COMPLAINT_PROCESSED.to_string()),
            ("complaint_type".to_string(), self.complaint_type.clone()),
        ])
    }
}
