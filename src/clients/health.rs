use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{
        circuit_breaker::CircuitBreaker, database::ComplaintStore, rbmq::RabbitMqClient,
    },
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
};

#[derive(Clone, Default)]
pub struct HealthChecker {
    store: Option<Arc<dyn ComplaintStore>>,
    broker: Option<Arc<RabbitMqClient>>,
    notification_circuit: Option<Arc<CircuitBreaker>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: Arc<dyn ComplaintStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_broker(mut self, broker: Arc<RabbitMqClient>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_notification_circuit(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.notification_circuit = Some(breaker);
        self
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        if let Some(store) = &self.store {
            checks.insert("database".to_string(), Self::check_database(store).await);
        }

        if let Some(broker) = &self.broker {
            checks.insert("message_broker".to_string(), Self::check_broker(broker));
        }

        if let Some(breaker) = &self.notification_circuit {
            checks.insert(
                "notification_circuit".to_string(),
                Self::check_circuit(breaker),
            );
        }

        HealthCheckResponse {
            status: overall_status(&checks),
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_database(store: &Arc<dyn ComplaintStore>) -> ServiceHealth {
        let start = Instant::now();

        match store.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Database health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                ServiceHealth::unhealthy(format!("Health check query failed: {}", e))
            }
        }
    }

    fn check_broker(broker: &RabbitMqClient) -> ServiceHealth {
        match broker.health_check() {
            Ok(()) => ServiceHealth::healthy(0),
            Err(e) => {
                warn!(error = %e, "RabbitMQ health check failed");
                ServiceHealth::unhealthy(e.to_string())
            }
        }
    }

    fn check_circuit(breaker: &CircuitBreaker) -> ServiceHealth {
        let state = breaker.state();
        debug!(breaker = %breaker.name(), circuit_state = state.as_str(), "Circuit breaker state checked");
        ServiceHealth::circuit(state)
    }
}

pub fn overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    if checks.values().any(|h| h.status == HealthStatus::Unhealthy) {
        HealthStatus::Unhealthy
    } else if checks.values().any(|h| h.status == HealthStatus::Degraded) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
