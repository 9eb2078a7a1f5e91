use thiserror::Error;
use uuid::Uuid;

use crate::models::status::NotificationStatus;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Notification {id} cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub id: Uuid,
    pub from: NotificationStatus,
    pub to: NotificationStatus,
}

/// Returned by a breaker that refuses a call while OPEN or out of half-open trials.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Circuit breaker is open for {service}")]
pub struct CircuitOpen {
    pub service: String,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Notification not found with ID: {0}")]
    NotFound(Uuid),

    #[error("Invalid notification request: {0}")]
    Validation(String),

    #[error("Failed to publish notification message")]
    Publish(#[source] anyhow::Error),

    #[error("Notification store error")]
    Store(#[source] anyhow::Error),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Email dispatcher is saturated ({capacity} jobs queued), job rejected")]
    Rejected { capacity: usize },

    #[error("Email dispatcher is shut down")]
    Closed,
}
