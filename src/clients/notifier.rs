use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{error::NotifyError, models::event::ProcessedEvent};

/// Delivers the customer-facing notification for a processed complaint.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &ProcessedEvent) -> Result<(), NotifyError>;
}

/// Simulated e-mail delivery: records the message and waits as a real send would.
pub struct LogNotifier {
    delay: Duration,
}

impl LogNotifier {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &ProcessedEvent) -> Result<(), NotifyError> {
        info!(
            complaint_id = %event.complaint_id,
            to = %event.customer_email,
            complaint_type = %event.complaint_type,
            "Sending complaint confirmation e-mail"
        );

        sleep(self.delay).await;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub complaint_id: Uuid,
}

impl EmailRequest {
    pub fn for_event(event: &ProcessedEvent) -> Self {
        Self {
            to: event.customer_email.clone(),
            subject: format!("We received your {} complaint", event.complaint_type),
            body: format!(
                "Your complaint {} was processed at {}. We will be in touch shortly.",
                event.complaint_id,
                event.processed_at.to_rfc3339()
            ),
            complaint_id: event.complaint_id,
        }
    }
}

/// Posts an e-mail request to a delivery webhook.
pub struct HttpNotifier {
    http_client: Client,
    webhook_url: String,
}

impl HttpNotifier {
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let webhook_url = webhook_url.into();
        let http_client = Client::builder().timeout(timeout).build()?;

        info!(webhook_url = %webhook_url, "HTTP notifier initialized");

        Ok(Self {
            http_client,
            webhook_url,
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, event: &ProcessedEvent) -> Result<(), NotifyError> {
        debug!(complaint_id = %event.complaint_id, "Posting notification to webhook");

        let response = self
            .http_client
            .post(&self.webhook_url)
            .json(&EmailRequest::for_event(event))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(complaint_id = %event.complaint_id, "Notification delivered");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(NotifyError::Unavailable {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
