use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    error::StoreError,
    models::{
        complaint::{ComplaintRecord, NewComplaint, PersistedComplaint},
        status::ComplaintStatus,
    },
};

const SCHEMA: &str = include_str!("../../migrations/0001_create_complaints.sql");

/// Persistence boundary for processed complaints.
#[async_trait]
pub trait ComplaintStore: Send + Sync {
    /// Inserts `complaint` unless a row with the same idempotency key exists, in which case
    /// that row is returned with `created == false`.
    async fn insert(&self, complaint: &NewComplaint) -> Result<PersistedComplaint, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub struct PgComplaintStore {
    pool: PgPool,
}

impl PgComplaintStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        info!("Connecting to PostgreSQL database");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("Complaints schema ensured");
        Ok(())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<ComplaintRecord, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, idempotency_key, customer_name, customer_email,
                   complaint_type, description, received_at, status
            FROM complaints
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await?;

        record_from_row(&row)
    }
}

#[async_trait]
impl ComplaintStore for PgComplaintStore {
    async fn insert(&self, complaint: &NewComplaint) -> Result<PersistedComplaint, StoreError> {
        let status = complaint.status.to_string();

        let inserted = sqlx::query(
            r#"
            INSERT INTO complaints (
                id,
                idempotency_key,
                customer_name,
                customer_email,
                complaint_type,
                description,
                received_at,
                status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(complaint.id)
        .bind(&complaint.idempotency_key)
        .bind(&complaint.submission.customer_name)
        .bind(&complaint.submission.customer_email)
        .bind(&complaint.submission.complaint_type)
        .bind(&complaint.submission.description)
        .bind(complaint.received_at)
        .bind(&status)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(
                error = %e,
                idempotency_key = %complaint.idempotency_key,
                "Failed to insert complaint"
            );
            match e {
                sqlx::Error::Database(db) if db.constraint().is_some() => {
                    StoreError::Constraint(db.message().to_string())
                }
                other => StoreError::from(other),
            }
        })?;

        if inserted.is_some() {
            debug!(complaint_id = %complaint.id, "Complaint inserted");
            return Ok(PersistedComplaint {
                record: complaint.clone().into_record(),
                created: true,
            });
        }

        let existing = self
            .find_by_idempotency_key(&complaint.idempotency_key)
            .await?;

        info!(
            complaint_id = %existing.id,
            idempotency_key = %complaint.idempotency_key,
            "Complaint already stored for this message, reusing it"
        );

        Ok(PersistedComplaint {
            record: existing,
            created: false,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn record_from_row(row: &PgRow) -> Result<ComplaintRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let status = ComplaintStatus::from_string(&status)
        .ok_or_else(|| StoreError::InvalidRow(format!("unknown status '{}'", status)))?;

    Ok(ComplaintRecord {
        id: row.try_get::<Uuid, _>("id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        customer_name: row.try_get("customer_name")?,
        customer_email: row.try_get("customer_email")?,
        complaint_type: row.try_get("complaint_type")?,
        description: row.try_get("description")?,
        received_at: row.try_get::<DateTime<Utc>, _>("received_at")?,
        status,
    })
}
