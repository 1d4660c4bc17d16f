//! Error types for every collaborator the workers talk to.
//!
//! Each error knows whether it is worth retrying through [`Transient`]; the resilience policy
//! uses that to tell a flaky dependency apart from a request that will never succeed.

use std::time::Duration;

use thiserror::Error;

/// Classifies an error as retryable (`true`) or fatal (`false`).
pub trait Transient {
    fn is_transient(&self) -> bool;
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("receipt handle {0} is no longer valid")]
    ReceiptExpired(String),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

impl Transient for QueueError {
    fn is_transient(&self) -> bool {
        matches!(self, QueueError::Broker(_) | QueueError::Unavailable(_))
    }
}

#[derive(Error, Debug)]
pub enum TopicError {
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("topic unavailable: {0}")]
    Unavailable(String),
}

impl Transient for TopicError {
    fn is_transient(&self) -> bool {
        matches!(self, TopicError::Broker(_) | TopicError::Unavailable(_))
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored row is invalid: {0}")]
    InvalidRow(String),

    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("constraint violated: {0}")]
    Constraint(String),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => is_transient_sqlx(e),
            StoreError::Unavailable(_) => true,
            StoreError::InvalidRow(_) | StoreError::Constraint(_) => false,
        }
    }
}

fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
        _ => false,
    }
}

/// SQLSTATE codes that describe the connection or the server rather than the statement.
pub fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08")
        || matches!(code, "40001" | "40P01" | "53300" | "57P01" | "57P02" | "57P03")
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification provider rejected the request with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("notification provider unavailable with {status}: {body}")]
    Unavailable { status: u16, body: String },
}

impl Transient for NotifyError {
    fn is_transient(&self) -> bool {
        match self {
            NotifyError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            NotifyError::Unavailable { .. } => true,
            NotifyError::Rejected { .. } => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl Transient for LedgerError {
    fn is_transient(&self) -> bool {
        match self {
            LedgerError::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
        }
    }
}

/// Terminal outcome of running an operation under a resilience policy.
#[derive(Error, Debug)]
pub enum PolicyError<E> {
    #[error("circuit '{policy}' is open, retry after {retry_after:?}")]
    CircuitOpen { policy: String, retry_after: Duration },

    #[error("'{policy}' gave up after {attempts} attempt(s): {source}")]
    Exhausted {
        policy: String,
        attempts: u32,
        #[source]
        source: E,
    },

    #[error("'{policy}' failed with a non-retryable error: {source}")]
    Fatal {
        policy: String,
        #[source]
        source: E,
    },
}

impl<E> PolicyError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, PolicyError::CircuitOpen { .. })
    }
}
