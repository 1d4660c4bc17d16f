use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport wrapper a topic puts around every published body before it reaches a
/// subscriber queue. Only `Message` is required on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TopicEnvelope {
    #[serde(default = "notification_type")]
    pub r#type: String,

    #[serde(default)]
    pub message_id: String,

    #[serde(default, rename = "TopicArn")]
    pub topic: String,

    pub message: String,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub message_attributes: HashMap<String, EnvelopeAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnvelopeAttribute {
    pub r#type: String,
    pub value: String,
}

fn notification_type() -> String {
    "Notification".to_string()
}

impl TopicEnvelope {
    pub fn wrap(
        topic: &str,
        message_id: String,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Self {
        Self {
            r#type: notification_type(),
            message_id,
            topic: topic.to_string(),
            message: body.to_string(),
            timestamp: Utc::now(),
            message_attributes: attributes
                .iter()
                .map(|(k, v)| {
                    (
                        k.clone(),
                        EnvelopeAttribute {
                            r#type: "String".to_string(),
                            value: v.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}
