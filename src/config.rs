use std::time::Duration;

use anyhow::{Context, Error, Result};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    models::{circuit_breaker::CircuitBreakerConfig, retry::RetryConfig},
    workers::PollSettings,
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    #[serde(default = "default_complaints_queue")]
    pub complaints_queue_name: String,
    #[serde(default = "default_notifications_queue")]
    pub notifications_queue_name: String,
    #[serde(default = "default_processed_exchange")]
    pub processed_exchange_name: String,
    pub dead_letter_queue_name: Option<String>,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    pub database_url: String,
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    pub redis_url: Option<String>,
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,

    pub notification_webhook_url: Option<String>,
    #[serde(default = "default_notification_timeout_seconds")]
    pub notification_timeout_seconds: u64,

    #[serde(default = "default_receive_batch_size")]
    pub receive_batch_size: usize,
    #[serde(default = "default_receive_wait_seconds")]
    pub receive_wait_seconds: u64,
    #[serde(default = "default_visibility_timeout_seconds")]
    pub visibility_timeout_seconds: u64,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_retry_attempts")]
    pub db_retry_attempts: u32,
    #[serde(default = "default_db_retry_base_ms")]
    pub db_retry_base_ms: u64,
    #[serde(default = "default_db_retry_max_ms")]
    pub db_retry_max_ms: u64,

    #[serde(default = "default_retry_attempts")]
    pub topic_retry_attempts: u32,
    #[serde(default = "default_retry_step_ms")]
    pub topic_retry_step_ms: u64,

    #[serde(default = "default_retry_attempts")]
    pub notify_retry_attempts: u32,
    #[serde(default = "default_retry_step_ms")]
    pub notify_retry_step_ms: u64,

    #[serde(default = "default_retry_attempts")]
    pub ingest_retry_attempts: u32,
    #[serde(default = "default_retry_step_ms")]
    pub ingest_retry_step_ms: u64,

    #[serde(default)]
    pub retry_jitter: bool,

    #[serde(default = "default_circuit_breaker_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_circuit_breaker_open_seconds")]
    pub circuit_breaker_open_seconds: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

/// Which process the configuration is being used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Processor,
    Notifier,
}

fn default_complaints_queue() -> String {
    "complaints".to_string()
}

fn default_notifications_queue() -> String {
    "complaint-notifications".to_string()
}

fn default_processed_exchange() -> String {
    "complaint-processed".to_string()
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_database_max_connections() -> u32 {
    5
}

fn default_idempotency_ttl_seconds() -> u64 {
    86_400
}

fn default_notification_timeout_seconds() -> u64 {
    10
}

fn default_receive_batch_size() -> usize {
    5
}

fn default_receive_wait_seconds() -> u64 {
    20
}

fn default_visibility_timeout_seconds() -> u64 {
    60
}

fn default_worker_concurrency() -> usize {
    1
}

fn default_retry_attempts() -> u32 {
    4
}

fn default_db_retry_base_ms() -> u64 {
    1_000
}

fn default_db_retry_max_ms() -> u64 {
    30_000
}

fn default_retry_step_ms() -> u64 {
    1_000
}

fn default_circuit_breaker_failure_threshold() -> u32 {
    5
}

fn default_circuit_breaker_open_seconds() -> u64 {
    30
}

fn default_server_port() -> u16 {
    8080
}

fn default_shutdown_grace_seconds() -> u64 {
    30
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .context("Invalid or missing environmental variable")?;
        Ok(config)
    }

    fn jittered(&self, retry: RetryConfig) -> RetryConfig {
        if self.retry_jitter {
            retry.with_jitter()
        } else {
            retry
        }
    }

    /// Exponential schedule for persistence: 2s, 4s, 8s with the default base.
    pub fn db_retry(&self) -> RetryConfig {
        self.jittered(RetryConfig::exponential(
            self.db_retry_attempts,
            Duration::from_millis(self.db_retry_base_ms),
            Duration::from_millis(self.db_retry_max_ms),
        ))
    }

    pub fn topic_retry(&self) -> RetryConfig {
        self.jittered(RetryConfig::linear(
            self.topic_retry_attempts,
            Duration::from_millis(self.topic_retry_step_ms),
        ))
    }

    pub fn notify_retry(&self) -> RetryConfig {
        self.jittered(RetryConfig::linear(
            self.notify_retry_attempts,
            Duration::from_millis(self.notify_retry_step_ms),
        ))
    }

    pub fn ingest_retry(&self) -> RetryConfig {
        self.jittered(RetryConfig::linear(
            self.ingest_retry_attempts,
            Duration::from_millis(self.ingest_retry_step_ms),
        ))
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold.max(1),
            open_duration: Duration::from_secs(self.circuit_breaker_open_seconds),
        }
    }

    /// The notifier handles one message at a time so a failure never holds others back.
    pub fn poll_settings(&self, role: Role) -> PollSettings {
        let wait = Duration::from_secs(self.receive_wait_seconds.min(20));

        match role {
            Role::Processor => PollSettings::new(self.receive_batch_size.clamp(1, 5), wait)
                .with_concurrency(self.worker_concurrency),
            Role::Notifier => PollSettings::new(1, wait),
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}
