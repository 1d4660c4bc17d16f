use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{LedgerError, PolicyError},
    models::{retry::RetryConfig, status::ClaimStatus},
    policy::ResiliencePolicy,
};

const PROCESSING: &str = "processing";
const SENT: &str = "sent";

/// Remembers which complaints already had their notification sent, so a re-published
/// event does not notify the customer twice.
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    /// Atomically claims `complaint_id` for sending unless it is sent or claimed already.
    async fn claim(&self, complaint_id: Uuid) -> Result<ClaimStatus, LedgerError>;

    async fn mark_sent(&self, complaint_id: Uuid) -> Result<(), PolicyError<LedgerError>>;

    /// Drops a claim after a failed send so a redelivery can try again.
    async fn release(&self, complaint_id: Uuid) -> Result<(), LedgerError>;
}

pub struct RedisLedger {
    connection: MultiplexedConnection,
    claim_ttl_seconds: u64,
    sent_ttl_seconds: u64,
    write_policy: ResiliencePolicy,
}

impl RedisLedger {
    pub async fn connect(
        redis_url: &str,
        claim_ttl_seconds: u64,
        sent_ttl_seconds: u64,
        retry: RetryConfig,
    ) -> Result<Self, LedgerError> {
        info!("Connecting to Redis");

        let client = Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            claim_ttl_seconds,
            sent_ttl_seconds,
            write_policy: ResiliencePolicy::new("redis-ledger", retry),
        })
    }

    fn key(complaint_id: Uuid) -> String {
        format!("notification:{}", complaint_id)
    }
}

#[async_trait]
impl NotificationLedger for RedisLedger {
    async fn claim(&self, complaint_id: Uuid) -> Result<ClaimStatus, LedgerError> {
        let key = Self::key(complaint_id);
        let mut conn = self.connection.clone();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(PROCESSING)
            .arg("NX")
            .arg("EX")
            .arg(self.claim_ttl_seconds)
            .query_async(&mut conn)
            .await?;

        if acquired.is_some() {
            return Ok(ClaimStatus::Acquired);
        }

        let current: Option<String> = conn.get(&key).await?;
        let status = match current.as_deref() {
            Some(SENT) => ClaimStatus::AlreadySent,
            Some(_) => ClaimStatus::InProgress,
            // Expired between the two commands; let the redelivery claim it.
            None => ClaimStatus::InProgress,
        };

        debug!(complaint_id = %complaint_id, ?status, "Notification already claimed");

        Ok(status)
    }

    async fn mark_sent(&self, complaint_id: Uuid) -> Result<(), PolicyError<LedgerError>> {
        let key = Self::key(complaint_id);
        let ttl = self.sent_ttl_seconds;

        self.write_policy
            .execute(|| {
                let key = key.clone();
                let mut conn = self.connection.clone();

                async move {
                    conn.set_ex::<_, _, ()>(&key, SENT, ttl)
                        .await
                        .map_err(LedgerError::from)
                }
            })
            .await
    }

    async fn release(&self, complaint_id: Uuid) -> Result<(), LedgerError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(Self::key(complaint_id)).await?;
        Ok(())
    }
}
