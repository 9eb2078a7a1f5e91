use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::{
        database::NotificationStore,
        dependency::{PropertyServiceClient, UserServiceClient},
    },
    error::ServiceError,
    models::{
        message::Destination,
        notification::{
            NotificationRecord, NotificationRequest, NotificationStatistics, PropertyContext,
        },
        status::{NotificationStatus, NotificationType},
        validation::validate_request,
    },
    producer::NotificationProducer,
    utils::{build_property_message, property_url},
};

/// Entry point for callers that want a notification delivered. Owns record creation
/// and hands messages to the producer.
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    producer: Arc<NotificationProducer>,
    user_client: Arc<UserServiceClient>,
    property_client: Arc<PropertyServiceClient>,
    frontend_base_url: String,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        producer: Arc<NotificationProducer>,
        user_client: Arc<UserServiceClient>,
        property_client: Arc<PropertyServiceClient>,
        frontend_base_url: &str,
    ) -> Self {
        Self {
            store,
            producer,
            user_client,
            property_client,
            frontend_base_url: frontend_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn enqueue(
        &self,
        request: NotificationRequest,
    ) -> Result<NotificationRecord, ServiceError> {
        self.enqueue_to(request, Destination::General).await
    }

    pub async fn enqueue_email(
        &self,
        request: NotificationRequest,
    ) -> Result<NotificationRecord, ServiceError> {
        self.enqueue_to(request, Destination::EmailOnly).await
    }

    async fn enqueue_to(
        &self,
        request: NotificationRequest,
        destination: Destination,
    ) -> Result<NotificationRecord, ServiceError> {
        validate_request(&request).map_err(|e| ServiceError::Validation(e.to_string()))?;

        let mut record = NotificationRecord::pending(&request);
        self.store
            .insert(&record)
            .await
            .map_err(ServiceError::Store)?;

        if let Err(e) = self
            .producer
            .publish(&request, Some(record.id), destination)
            .await
        {
            error!(notification_id = %record.id, error = %e, "Failed to publish notification");
            record.mark_failed(e.to_string(), false)?;
            if let Err(store_error) = self.store.update(&record).await {
                error!(
                    notification_id = %record.id,
                    error = %store_error,
                    "Failed to record publish failure"
                );
            }
            return Err(ServiceError::Publish(e));
        }

        info!(
            notification_id = %record.id,
            user_id = record.user_id,
            queue = %destination,
            "Notification enqueued"
        );
        Ok(record)
    }

    /// Announces a new property to every user in `user_ids`. Users that cannot be
    /// enqueued are logged and skipped.
    pub async fn notify_new_property(
        &self,
        property_id: i64,
        user_ids: &[i64],
    ) -> Vec<NotificationRecord> {
        let property = self.property_client.get_property_by_id(property_id).await;
        let url = property_url(&self.frontend_base_url, property_id);
        let message = build_property_message(&property, &url);
        let title = property.title.clone().unwrap_or_default();

        let context = PropertyContext {
            property_id: Some(property_id),
            title: property.title.clone(),
            address: property.address.clone(),
            image_urls: Vec::new(),
            price: property.rent_amount,
            url: Some(url),
        }
        .with_images(property.images());

        let mut records = Vec::with_capacity(user_ids.len());

        for &user_id in user_ids {
            let user = self.user_client.get_user_by_id(user_id).await;

            let mut request = NotificationRequest::new(
                user_id,
                user.email.clone(),
                NotificationType::NewProperty,
                format!("New Property Available: {}", title),
                message.clone(),
            )
            .with_property(context.clone());
            request.user_first_name = user.first_name.clone();
            request.user_last_name = user.last_name.clone();
            request.user_name = user.full_name();

            match self
                .enqueue_to(request, Destination::PropertyNotification)
                .await
            {
                Ok(record) => records.push(record),
                Err(e) => warn!(user_id, property_id, error = %e, "Skipping property notification"),
            }
        }

        info!(
            property_id,
            notified = records.len(),
            requested = user_ids.len(),
            "Property notifications enqueued"
        );
        records
    }

    pub async fn get_notification(&self, id: Uuid) -> Result<NotificationRecord, ServiceError> {
        self.store
            .find_by_id(id)
            .await
            .map_err(ServiceError::Store)?
            .ok_or(ServiceError::NotFound(id))
    }

    pub async fn user_notifications(
        &self,
        user_id: i64,
    ) -> Result<Vec<NotificationRecord>, ServiceError> {
        self.store
            .find_by_user(user_id)
            .await
            .map_err(ServiceError::Store)
    }

    pub async fn notifications_by_status(
        &self,
        status: NotificationStatus,
    ) -> Result<Vec<NotificationRecord>, ServiceError> {
        self.store
            .find_by_status(status)
            .await
            .map_err(ServiceError::Store)
    }

    /// Puts PENDING records and FAILED records below `max_retries` back on the general
    /// queue. Returns each processed record as stored afterwards: RETRYING when
    /// republished, FAILED when the publish did not go through.
    pub async fn retry_failed(
        &self,
        max_retries: u32,
    ) -> Result<Vec<NotificationRecord>, ServiceError> {
        let candidates = self
            .store
            .find_retryable(max_retries)
            .await
            .map_err(ServiceError::Store)?;

        info!(candidates = candidates.len(), "Retrying failed notifications");

        let mut processed = Vec::with_capacity(candidates.len());

        for mut record in candidates {
            if let Err(e) = record.mark_resubmitted() {
                warn!(error = %e, "Skipping notification that cannot be resubmitted");
                continue;
            }

            if let Err(e) = self.store.update(&record).await {
                error!(notification_id = %record.id, error = %e, "Failed to persist resubmission");
                continue;
            }

            match self.producer.republish(&record, Destination::General).await {
                Ok(_) => debug!(notification_id = %record.id, "Notification republished"),
                Err(e) => {
                    error!(notification_id = %record.id, error = %e, "Failed to republish notification");
                    record.mark_failed(e.to_string(), false)?;
                    if let Err(store_error) = self.store.update(&record).await {
                        error!(notification_id = %record.id, error = %store_error, "Failed to record publish failure");
                    }
                }
            }

            processed.push(record);
        }

        Ok(processed)
    }

    pub async fn delete_notification(&self, id: Uuid) -> Result<(), ServiceError> {
        let deleted = self.store.delete(id).await.map_err(ServiceError::Store)?;

        if !deleted {
            return Err(ServiceError::NotFound(id));
        }

        info!(notification_id = %id, "Notification deleted");
        Ok(())
    }

    pub async fn statistics(&self) -> Result<NotificationStatistics, ServiceError> {
        let counts = self
            .store
            .status_counts()
            .await
            .map_err(ServiceError::Store)?;

        Ok(NotificationStatistics::from_counts(&counts))
    }
}
