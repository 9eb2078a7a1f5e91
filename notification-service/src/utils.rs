use anyhow::Result;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::models::{dependency::PropertyDto, retry::RetryConfig};

pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_when(config, operation, |_| true).await
}

/// Like [`retry_with_backoff`], but gives up at once on errors `is_retryable` rejects.
pub async fn retry_with_backoff_when<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(attempt, max_attempts, "Retry succeeded");
                }
                return Ok(result);
            }
            Err(e) => {
                if !is_retryable(&e) {
                    debug!(attempt, error = %e, "Error is not retryable");
                    return Err(e);
                }

                if attempt >= max_attempts {
                    warn!(
                        max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                debug!(
                    attempt,
                    max_attempts,
                    delay_ms,
                    error = %e,
                    "Attempt failed, backing off"
                );

                let jitter = rand::random_range(-0.1..=0.1);
                let jittered_delay = (delay_ms as f64 * (1.0 + jitter)) as u64;

                sleep(Duration::from_millis(jittered_delay)).await;

                delay_ms = std::cmp::min(
                    delay_ms.saturating_mul(config.backoff_multiplier),
                    config.max_delay_ms,
                );
            }
        }
    }
}

pub fn property_url(frontend_base_url: &str, property_id: i64) -> String {
    format!(
        "{}/property/{}",
        frontend_base_url.trim_end_matches('/'),
        property_id
    )
}

/// Plain-text body for a new-property alert.
pub fn build_property_message(property: &PropertyDto, property_url: &str) -> String {
    let mut message = String::from("A new property is now available!\n\n");

    message.push_str(&format!(
        "Title: {}\n",
        property.title.as_deref().unwrap_or("Untitled property")
    ));
    message.push_str(&format!(
        "Address: {}",
        property.address.as_deref().unwrap_or("N/A")
    ));

    if let Some(description) = property.description.as_deref().filter(|d| !d.is_empty()) {
        message.push_str(&format!(", {}", description));
    }
    message.push('\n');

    if let Some(rent) = property.rent_amount {
        message.push_str(&format!("Price: €{:.2}/month\n", rent));
    }

    message.push_str(&format!("\nView details at: {}", property_url));
    message
}
