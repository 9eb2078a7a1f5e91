use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::{
    clients::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry},
    error::CircuitOpen,
    models::{
        dependency::{PropertyDto, UserDto},
        retry::RetryConfig,
    },
    utils::retry_with_backoff_when,
};

pub const USER_SERVICE: &str = "user-service";
pub const PROPERTY_SERVICE: &str = "property-service";

fn build_http_client(timeout: Duration) -> Result<Client, Error> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))
}

async fn fetch<T>(http_client: Client, url: String) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    let response = http_client
        .get(&url)
        .send()
        .await
        .map_err(|e| anyhow!("Request to {} failed: {}", url, e))?;
    let status = response.status();

    if status == StatusCode::NOT_FOUND {
        return Err(anyhow!("Resource not found at {}", url));
    }

    if !status.is_success() {
        return Err(anyhow!("Dependency returned status {}", status));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| anyhow!("Failed to parse response JSON: {}", e))
}

/// Retries single HTTP attempts, each one recorded by the breaker. Stops early once
/// the breaker refuses a call.
async fn fetch_guarded<T>(
    circuit_breaker: &Arc<CircuitBreaker>,
    http_client: &Client,
    retry_config: &RetryConfig,
    url: &str,
) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    retry_with_backoff_when(
        retry_config,
        || {
            let breaker = Arc::clone(circuit_breaker);
            let client = http_client.clone();
            let url = url.to_string();

            async move { breaker.call(|| fetch::<T>(client, url)).await }
        },
        |e: &Error| !e.is::<CircuitOpen>(),
    )
    .await
}

/// User service lookups. Always yields a user: a synthetic one when the service
/// is unavailable or the circuit is open.
pub struct UserServiceClient {
    http_client: Client,
    base_url: String,
    retry_config: RetryConfig,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl UserServiceClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        retry_config: RetryConfig,
        registry: &CircuitBreakerRegistry,
    ) -> Result<Self, Error> {
        info!(base_url, "User service client initialized");

        Ok(Self {
            http_client: build_http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_config,
            circuit_breaker: registry.circuit_breaker(USER_SERVICE),
        })
    }

    pub async fn get_user_by_id(&self, user_id: i64) -> UserDto {
        let url = format!("{}/api/internal/users/id/{}", self.base_url, user_id);
        debug!(user_id, "Calling user service");

        fetch_guarded(
            &self.circuit_breaker,
            &self.http_client,
            &self.retry_config,
            &url,
        )
        .await
        .unwrap_or_else(|e| {
            warn!(user_id, reason = %e, "Using fallback user data");
            UserDto::fallback(user_id)
        })
    }
}

/// Property service lookups, degrading to a placeholder property.
pub struct PropertyServiceClient {
    http_client: Client,
    base_url: String,
    retry_config: RetryConfig,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl PropertyServiceClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        retry_config: RetryConfig,
        registry: &CircuitBreakerRegistry,
    ) -> Result<Self, Error> {
        info!(base_url, "Property service client initialized");

        Ok(Self {
            http_client: build_http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_config,
            circuit_breaker: registry.circuit_breaker(PROPERTY_SERVICE),
        })
    }

    pub async fn get_property_by_id(&self, property_id: i64) -> PropertyDto {
        let url = format!("{}/api/v1/properties/{}", self.base_url, property_id);
        debug!(property_id, "Calling property service");

        fetch_guarded(
            &self.circuit_breaker,
            &self.http_client,
            &self.retry_config,
            &url,
        )
        .await
        .unwrap_or_else(|e| {
            warn!(property_id, reason = %e, "Using fallback property data");
            PropertyDto::fallback(property_id)
        })
    }
}
