use std::{collections::BTreeMap, sync::Arc};

use anyhow::{Result, anyhow};
use notification_service::{
    api::{AppState, router},
    clients::{
        circuit_breaker::CircuitBreakerRegistry,
        health::{HealthChecker, overall_status},
    },
    models::{
        circuit_breaker::CircuitState,
        health::{HealthStatus, ServiceHealth},
    },
};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::net::TcpListener;

use crate::common::Harness;

async fn serve(harness: &Harness) -> Result<String> {
    let state = Arc::new(AppState {
        health_checker: HealthChecker::new(
            harness.store.clone(),
            None,
            Arc::clone(&harness.registry),
        ),
        registry: Arc::clone(&harness.registry),
        service: Arc::clone(&harness.service),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(state)).await;
    });

    Ok(format!("http://{}", addr))
}

async fn trip(registry: &CircuitBreakerRegistry, name: &str) {
    let breaker = registry.circuit_breaker(name);
    for _ in 0..5 {
        let _ = breaker
            .call(|| async { Err::<(), _>(anyhow!("connection refused")) })
            .await;
    }
}

/// Test: Health endpoint reports degraded, not down, while a dependency breaker is open
#[tokio::test]
async fn test_health_endpoint_degrades_on_open_breaker() -> Result<()> {
    let harness = Harness::new(3).await?;
    let registry = &harness.registry;
    let base = serve(&harness).await?;
    let client = reqwest::Client::new();

    let response = client.get(format!("{}/health", base)).send().await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"]["status"], "healthy");

    trip(registry, "user-service").await;

    let response = client.get(format!("{}/health", base)).send().await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"]["user-service"]["circuit_breaker"], "OPEN");

    Ok(())
}

/// Test: Breakers can be listed, inspected and reset over HTTP
#[tokio::test]
async fn test_circuit_breaker_endpoints() -> Result<()> {
    let harness = Harness::new(3).await?;
    let registry = &harness.registry;
    trip(registry, "user-service").await;
    let base = serve(&harness).await?;
    let client = reqwest::Client::new();

    let list: Vec<Value> = client
        .get(format!("{}/circuit-breakers", base))
        .send()
        .await?
        .json()
        .await?;
    let names: Vec<_> = list.iter().filter_map(|b| b["name"].as_str()).collect();
    assert_eq!(names, vec!["property-service", "user-service"]);

    let single: Value = client
        .get(format!("{}/circuit-breakers/user-service", base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(single["state"], "OPEN");
    assert_eq!(single["numberOfFailedCalls"], 5);

    let reset = client
        .post(format!("{}/circuit-breakers/user-service/reset", base))
        .send()
        .await?;
    assert_eq!(reset.status(), StatusCode::OK);
    let reset: Value = reset.json().await?;
    assert_eq!(reset["state"], "CLOSED");
    assert_eq!(reset["numberOfBufferedCalls"], 0);
    assert_eq!(
        registry.circuit_breaker("user-service").state(),
        CircuitState::Closed
    );

    let missing = client
        .get(format!("{}/circuit-breakers/payment-service", base))
        .send()
        .await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let body: Value = missing.json().await?;
    assert_eq!(body["error"], "Circuit breaker not found: payment-service");

    Ok(())
}

/// Test: The orchestrator held by the API state shares the store the health check reads
#[tokio::test]
async fn test_app_state_service_uses_checked_store() -> Result<()> {
    let harness = Harness::new(3).await?;
    let base = serve(&harness).await?;

    harness.service.enqueue(crate::common::request(12)).await?;
    assert_eq!(harness.service.statistics().await?.pending, 1);

    let body: Value = reqwest::get(format!("{}/health", base)).await?.json().await?;
    assert_eq!(body["checks"]["database"]["status"], "healthy");

    Ok(())
}

/// Test: Critical checks decide unhealthy, anything else only degrades
#[test]
fn test_overall_status_rules() {
    let mut checks = BTreeMap::from([
        ("database".to_string(), ServiceHealth::healthy(3)),
        ("message_broker".to_string(), ServiceHealth::healthy(0)),
    ]);
    assert_eq!(overall_status(&checks), HealthStatus::Healthy);

    checks.insert(
        "property-service".to_string(),
        ServiceHealth::from_circuit(CircuitState::HalfOpen),
    );
    assert_eq!(overall_status(&checks), HealthStatus::Degraded);

    checks.insert(
        "message_broker".to_string(),
        ServiceHealth::unhealthy("Connection closed".to_string()),
    );
    assert_eq!(overall_status(&checks), HealthStatus::Unhealthy);
}
