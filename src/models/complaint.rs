use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::status::ComplaintStatus;

/// Complaint as submitted by a customer. This is the exact queue message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct ComplaintSubmission {
    #[validate(custom(function = "not_blank", message = "customer name is required"))]
    pub customer_name: String,

    #[validate(
        custom(function = "not_blank", message = "customer email is required"),
        email(message = "customer email must be a valid email address")
    )]
    pub customer_email: String,

    #[validate(custom(function = "not_blank", message = "complaint type is required"))]
    pub complaint_type: String,

    #[validate(
        custom(function = "not_blank", message = "description is required"),
        length(
            min = 10,
            max = 1000,
            message = "description must be between 10 and 1000 characters"
        )
    )]
    pub description: String,
}

/// Required text fields must carry something other than whitespace.
fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplaintRecord {
    pub id: Uuid,
    pub idempotency_key: String,
    pub customer_name: String,
    pub customer_email: String,
    pub complaint_type: String,
    pub description: String,
    pub received_at: DateTime<Utc>,
    pub status: ComplaintStatus,
}

/// Row about to be inserted. Identity and timestamp are assigned at processing time.
#[derive(Debug, Clone)]
pub struct NewComplaint {
    pub id: Uuid,
    pub idempotency_key: String,
    pub submission: ComplaintSubmission,
    pub received_at: DateTime<Utc>,
    pub status: ComplaintStatus,
}

impl NewComplaint {
    pub fn new(submission: ComplaintSubmission, idempotency_key: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            idempotency_key,
            submission,
            received_at: Utc::now(),
            status: ComplaintStatus::Received,
        }
    }

    pub fn into_record(self) -> ComplaintRecord {
        ComplaintRecord {
            id: self.id,
            idempotency_key: self.idempotency_key,
            customer_name: self.submission.customer_name,
            customer_email: self.submission.customer_email,
            complaint_type: self.submission.complaint_type,
            description: self.submission.description,
            received_at: self.received_at,
            status: self.status,
        }
    }
}

/// What the store did with an insert request.
#[derive(Debug, Clone)]
pub struct PersistedComplaint {
    pub record: ComplaintRecord,
    /// `false` when a row with the same idempotency key already existed.
    pub created: bool,
}
