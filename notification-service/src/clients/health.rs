use std::{collections::BTreeMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{
        circuit_breaker::CircuitBreakerRegistry, database::NotificationStore,
        rbmq::RabbitMqClient,
    },
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
};

const CRITICAL_CHECKS: [&str; 2] = ["database", "message_broker"];

pub struct HealthChecker {
    store: Arc<dyn NotificationStore>,
    broker: Option<Arc<RabbitMqClient>>,
    registry: Arc<CircuitBreakerRegistry>,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        broker: Option<Arc<RabbitMqClient>>,
        registry: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            store,
            broker,
            registry,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = BTreeMap::new();

        checks.insert("database".to_string(), self.check_database().await);

        if let Some(broker) = &self.broker {
            checks.insert("message_broker".to_string(), check_broker(broker));
        }

        for snapshot in self.registry.snapshots() {
            debug!(
                service = %snapshot.name,
                circuit_state = snapshot.state.as_str(),
                "Circuit breaker state checked"
            );
            checks.insert(snapshot.name, ServiceHealth::from_circuit(snapshot.state));
        }

        HealthCheckResponse {
            status: overall_status(&checks),
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_database(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.store.health_check().await {
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
}

fn check_broker(broker: &RabbitMqClient) -> ServiceHealth {
    if broker.is_connected() {
        ServiceHealth::healthy(0)
    } else {
        warn!("RabbitMQ connection lost");
        ServiceHealth::unhealthy("Connection closed".to_string())
    }
}

/// Any critical check down makes the service unhealthy; open breakers only degrade it.
pub fn overall_status(checks: &BTreeMap<String, ServiceHealth>) -> HealthStatus {
    let critical_unhealthy = checks
        .iter()
        .filter(|(name, _)| CRITICAL_CHECKS.contains(&name.as_str()))
        .any(|(_, health)| health.status == HealthStatus::Unhealthy);

    if critical_unhealthy {
        return HealthStatus::Unhealthy;
    }

    if checks
        .values()
        .any(|health| health.status != HealthStatus::Healthy)
    {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
