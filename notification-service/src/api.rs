use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    clients::{circuit_breaker::CircuitBreakerRegistry, health::HealthChecker},
    models::health::HealthStatus,
    service::NotificationService,
};

pub struct AppState {
    pub health_checker: HealthChecker,
    pub registry: Arc<CircuitBreakerRegistry>,
    pub service: Arc<NotificationService>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/circuit-breakers", get(list_circuit_breakers))
        .route("/circuit-breakers/{name}", get(get_circuit_breaker))
        .route("/circuit-breakers/{name}/reset", post(reset_circuit_breaker))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    state: Arc<AppState>,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;

    info!(address = %addr, "Health check server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| anyhow!("Health check server failed: {}", e))?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn list_circuit_breakers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.snapshots())
}

async fn get_circuit_breaker(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.registry.find(&name) {
        Some(breaker) => Json(breaker.snapshot()).into_response(),
        None => not_found(&name),
    }
}

async fn reset_circuit_breaker(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.registry.find(&name) {
        Some(breaker) => {
            breaker.reset();
            Json(breaker.snapshot()).into_response()
        }
        None => not_found(&name),
    }
}

fn not_found(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("Circuit breaker not found: {}", name) })),
    )
        .into_response()
}
