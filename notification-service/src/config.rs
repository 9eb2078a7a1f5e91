use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{
    circuit_breaker::CircuitBreakerConfig,
    message::{DEFAULT_MAX_RETRIES, Destination},
    retry::RetryConfig,
};

pub const MAX_CONSUMER_CONCURRENCY: usize = 10;
pub const MIN_EMAIL_WORKERS: usize = 10;
pub const MAX_EMAIL_WORKERS: usize = 20;

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    #[serde(default = "default_exchange")]
    pub notification_exchange: String,
    #[serde(default = "default_dead_letter_exchange")]
    pub dead_letter_exchange: String,

    #[serde(default = "default_notification_queue")]
    pub notification_queue_name: String,
    #[serde(default = "default_email_queue")]
    pub email_queue_name: String,
    #[serde(default = "default_property_queue")]
    pub property_notification_queue_name: String,
    #[serde(default = "default_dead_letter_queue")]
    pub dead_letter_queue_name: String,
    #[serde(default = "default_appointment_queue")]
    pub appointment_queue_name: String,
    #[serde(default = "default_booking_queue")]
    pub booking_queue_name: String,

    #[serde(default = "default_notification_routing_key")]
    pub notification_routing_key: String,
    #[serde(default = "default_email_routing_key")]
    pub email_routing_key: String,
    #[serde(default = "default_property_routing_key")]
    pub property_notification_routing_key: String,
    #[serde(default = "default_dead_letter_routing_key")]
    pub dead_letter_routing_key: String,

    #[serde(default = "default_message_ttl_ms")]
    pub notification_message_ttl_ms: u32,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default = "default_consumer_concurrency")]
    pub consumer_concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_delivery_retries: u32,

    #[serde(default)]
    pub database_url: String,

    pub user_service_url: String,
    pub property_service_url: String,
    #[serde(default = "default_frontend_url")]
    pub frontend_base_url: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,

    #[serde(default = "default_window_size")]
    pub circuit_breaker_window_size: usize,
    #[serde(default = "default_minimum_calls")]
    pub circuit_breaker_minimum_calls: usize,
    #[serde(default = "default_rate_threshold")]
    pub circuit_breaker_failure_rate: f64,
    #[serde(default = "default_rate_threshold")]
    pub circuit_breaker_slow_call_rate: f64,
    #[serde(default = "default_slow_call_ms")]
    pub circuit_breaker_slow_call_ms: u64,
    #[serde(default = "default_open_wait_seconds")]
    pub circuit_breaker_wait_seconds: u64,
    #[serde(default = "default_half_open_calls")]
    pub circuit_breaker_half_open_calls: u32,

    #[serde(default = "default_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    #[serde(default = "default_smtp_from")]
    pub smtp_from: String,
    #[serde(default)]
    pub smtp_use_tls: bool,

    #[serde(default = "default_email_workers")]
    pub email_workers: usize,
    #[serde(default = "default_email_queue_capacity")]
    pub email_queue_capacity: usize,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

/// Names the broker topology is declared with.
#[derive(Debug, Clone)]
pub struct QueueTopology {
    pub exchange: String,
    pub dead_letter_exchange: String,
    pub dead_letter_queue: String,
    pub dead_letter_routing_key: String,
    pub notification_queue: String,
    pub email_queue: String,
    pub property_notification_queue: String,
    pub notification_routing_key: String,
    pub email_routing_key: String,
    pub property_notification_routing_key: String,
    pub event_queues: Vec<String>,
    pub notification_message_ttl_ms: u32,
}

impl QueueTopology {
    pub fn queue_name(&self, destination: Destination) -> &str {
        match destination {
            Destination::General => &self.notification_queue,
            Destination::EmailOnly => &self.email_queue,
            Destination::PropertyNotification => &self.property_notification_queue,
        }
    }

    pub fn routing_key(&self, destination: Destination) -> &str {
        match destination {
            Destination::General => &self.notification_routing_key,
            Destination::EmailOnly => &self.email_routing_key,
            Destination::PropertyNotification => &self.property_notification_routing_key,
        }
    }

    /// `x-message-ttl` is a signed 32-bit AMQP field.
    pub fn message_ttl_arg(&self) -> Result<i32, Error> {
        i32::try_from(self.notification_message_ttl_ms).map_err(|_| {
            anyhow!(
                "Notification message TTL {} ms exceeds the AMQP limit of {} ms",
                self.notification_message_ttl_ms,
                i32::MAX
            )
        })
    }
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            sliding_window_size: self.circuit_breaker_window_size.max(1),
            minimum_number_of_calls: self.circuit_breaker_minimum_calls.max(1),
            failure_rate_threshold: self.circuit_breaker_failure_rate,
            slow_call_rate_threshold: self.circuit_breaker_slow_call_rate,
            slow_call_duration: Duration::from_millis(self.circuit_breaker_slow_call_ms),
            wait_duration_in_open_state: Duration::from_secs(self.circuit_breaker_wait_seconds),
            permitted_calls_in_half_open_state: self.circuit_breaker_half_open_calls.max(1),
        }
    }

    pub fn queue_topology(&self) -> QueueTopology {
        QueueTopology {
            exchange: self.notification_exchange.clone(),
            dead_letter_exchange: self.dead_letter_exchange.clone(),
            dead_letter_queue: self.dead_letter_queue_name.clone(),
            dead_letter_routing_key: self.dead_letter_routing_key.clone(),
            notification_queue: self.notification_queue_name.clone(),
            email_queue: self.email_queue_name.clone(),
            property_notification_queue: self.property_notification_queue_name.clone(),
            notification_routing_key: self.notification_routing_key.clone(),
            email_routing_key: self.email_routing_key.clone(),
            property_notification_routing_key: self.property_notification_routing_key.clone(),
            event_queues: vec![
                self.appointment_queue_name.clone(),
                self.booking_queue_name.clone(),
            ],
            notification_message_ttl_ms: self.notification_message_ttl_ms,
        }
    }

    pub fn consumer_concurrency(&self) -> usize {
        self.consumer_concurrency.clamp(1, MAX_CONSUMER_CONCURRENCY)
    }

    pub fn email_workers(&self) -> usize {
        self.email_workers.clamp(MIN_EMAIL_WORKERS, MAX_EMAIL_WORKERS)
    }
}

fn default_exchange() -> String {
    "notification.exchange".to_string()
}

fn default_dead_letter_exchange() -> String {
    "notification.dlx".to_string()
}

fn default_notification_queue() -> String {
    "notification.queue".to_string()
}

fn default_email_queue() -> String {
    "email.queue".to_string()
}

fn default_property_queue() -> String {
    "property-notification.queue".to_string()
}

fn default_dead_letter_queue() -> String {
    "notification.dlq".to_string()
}

fn default_appointment_queue() -> String {
    "appointment-queue".to_string()
}

fn default_booking_queue() -> String {
    "booking-queue".to_string()
}

fn default_notification_routing_key() -> String {
    "notification.send".to_string()
}

fn default_email_routing_key() -> String {
    "notification.email".to_string()
}

fn default_property_routing_key() -> String {
    "notification.property".to_string()
}

fn default_dead_letter_routing_key() -> String {
    "notification.dead".to_string()
}

fn default_message_ttl_ms() -> u32 {
    300_000
}

fn default_prefetch_count() -> u16 {
    1
}

fn default_consumer_concurrency() -> usize {
    3
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_frontend_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    10
}

fn default_window_size() -> usize {
    10
}

fn default_minimum_calls() -> usize {
    5
}

fn default_rate_threshold() -> f64 {
    50.0
}

fn default_slow_call_ms() -> u64 {
    2000
}

fn default_open_wait_seconds() -> u64 {
    10
}

fn default_half_open_calls() -> u32 {
    3
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    500
}

fn default_max_retry_delay_ms() -> u64 {
    2000
}

fn default_backoff_multiplier() -> u64 {
    2
}

fn default_smtp_port() -> u16 {
    1025
}

fn default_smtp_from() -> String {
    "noreply@studenthousing.local".to_string()
}

fn default_email_workers() -> usize {
    10
}

fn default_email_queue_capacity() -> usize {
    500
}

fn default_server_port() -> u16 {
    8085
}
