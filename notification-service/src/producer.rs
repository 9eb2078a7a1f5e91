use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    clients::rbmq::MessagePublisher,
    config::QueueTopology,
    models::{
        message::{Destination, NotificationMessage},
        notification::{NotificationRecord, NotificationRequest},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    Requeued,
    Exhausted,
}

/// Serializes notification messages onto the exchange. Never touches the record store.
pub struct NotificationProducer {
    publisher: Arc<dyn MessagePublisher>,
    topology: QueueTopology,
    max_retries: u32,
}

impl NotificationProducer {
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        topology: QueueTopology,
        max_retries: u32,
    ) -> Self {
        Self {
            publisher,
            topology,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn publish(
        &self,
        request: &NotificationRequest,
        notification_id: Option<Uuid>,
        destination: Destination,
    ) -> Result<NotificationMessage, Error> {
        let message = NotificationMessage::from_request(request, notification_id, self.max_retries);
        self.send(&message, destination).await?;

        info!(
            notification_id = ?notification_id,
            user_id = request.user_id,
            queue = %destination,
            "Notification message published"
        );
        Ok(message)
    }

    /// Publishes `message` again unless its retries are used up.
    pub async fn requeue(
        &self,
        mut message: NotificationMessage,
        destination: Destination,
    ) -> Result<RequeueOutcome, Error> {
        if message.is_exhausted() {
            warn!(
                notification_id = ?message.notification_id,
                retry_count = message.retry_count,
                max_retries = message.max_retries,
                "Retries exhausted, message not requeued"
            );
            return Ok(RequeueOutcome::Exhausted);
        }

        message.timestamp = Utc::now();
        self.send(&message, destination).await?;

        info!(
            notification_id = ?message.notification_id,
            retry_count = message.retry_count,
            queue = %destination,
            "Notification message requeued"
        );
        Ok(RequeueOutcome::Requeued)
    }

    pub async fn republish(
        &self,
        record: &NotificationRecord,
        destination: Destination,
    ) -> Result<NotificationMessage, Error> {
        let message = NotificationMessage::from_record(record, self.max_retries);
        self.send(&message, destination).await?;
        Ok(message)
    }

    async fn send(&self, message: &NotificationMessage, destination: Destination) -> Result<(), Error> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| anyhow!("Failed to serialize notification message: {}", e))?;

        self.publisher
            .publish(self.topology.routing_key(destination), &payload)
            .await
    }
}
