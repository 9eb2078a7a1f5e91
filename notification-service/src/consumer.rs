use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use futures_util::StreamExt;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        database::NotificationStore,
        dependency::{PropertyServiceClient, UserServiceClient},
        email::EmailSender,
        rbmq::{QueueWorker, RabbitMqClient},
    },
    config::QueueTopology,
    models::{
        message::{Destination, NotificationMessage},
        notification::NotificationRecord,
        status::NotificationStatus,
    },
    producer::{NotificationProducer, RequeueOutcome},
    utils::{build_property_message, property_url},
};

const DEFAULT_SUBJECT: &str = "Notification";

/// What happened to one delivery. Everything except `Rejected` is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Retrying { retry_count: u32 },
    Failed,
    /// The linked record was already SENT or FAILED.
    Duplicate,
    /// Payload could not be decoded; dead-lettered by the broker.
    Rejected,
}

impl DeliveryOutcome {
    pub fn acknowledges(&self) -> bool {
        !matches!(self, DeliveryOutcome::Rejected)
    }
}

pub struct NotificationConsumer {
    store: Arc<dyn NotificationStore>,
    producer: Arc<NotificationProducer>,
    email_sender: Arc<dyn EmailSender>,
    user_client: Arc<UserServiceClient>,
    property_client: Arc<PropertyServiceClient>,
    frontend_base_url: String,
}

impl NotificationConsumer {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        producer: Arc<NotificationProducer>,
        email_sender: Arc<dyn EmailSender>,
        user_client: Arc<UserServiceClient>,
        property_client: Arc<PropertyServiceClient>,
        frontend_base_url: &str,
    ) -> Self {
        Self {
            store,
            producer,
            email_sender,
            user_client,
            property_client,
            frontend_base_url: frontend_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Processes one raw delivery from `destination`.
    pub async fn handle(&self, destination: Destination, payload: &[u8]) -> DeliveryOutcome {
        let message: NotificationMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                error!(queue = %destination, error = %e, "Undecodable notification payload");
                return DeliveryOutcome::Rejected;
            }
        };

        self.process(destination, message).await
    }

    pub async fn process(
        &self,
        destination: Destination,
        mut message: NotificationMessage,
    ) -> DeliveryOutcome {
        debug!(
            notification_id = ?message.notification_id,
            user_id = ?message.user_id,
            queue = %destination,
            retry_count = message.retry_count,
            "Processing notification message"
        );

        if destination == Destination::PropertyNotification {
            self.enrich(&mut message).await;
        }

        let mut record = self.link_record(&message).await;

        if let Some(existing) = &record {
            if existing.status.is_terminal() {
                info!(
                    notification_id = %existing.id,
                    status = %existing.status,
                    "Record already settled, skipping duplicate delivery"
                );
                return DeliveryOutcome::Duplicate;
            }
        }

        if let Some(record) = record.as_mut() {
            match record.mark_processing() {
                Ok(()) => self.save(record).await,
                Err(e) => warn!(error = %e, "Could not mark notification as processing"),
            }
        }

        match self.deliver(&message).await {
            Ok(()) => {
                if let Some(record) = record.as_mut() {
                    match record.mark_sent() {
                        Ok(()) => self.save(record).await,
                        Err(e) => warn!(error = %e, "Could not mark notification as sent"),
                    }
                }
                info!(
                    notification_id = ?message.notification_id,
                    queue = %destination,
                    "Notification delivered"
                );
                DeliveryOutcome::Sent
            }
            Err(e) => self.handle_failure(destination, message, record, e).await,
        }
    }

    async fn handle_failure(
        &self,
        destination: Destination,
        mut message: NotificationMessage,
        mut record: Option<NotificationRecord>,
        failure: Error,
    ) -> DeliveryOutcome {
        let reason = failure.to_string();

        if !destination.requeues_on_failure() {
            warn!(
                notification_id = ?message.notification_id,
                error = %reason,
                "Email-only delivery failed, not retried"
            );
            self.fail(record.as_mut(), &reason, false).await;
            return DeliveryOutcome::Failed;
        }

        let next = message.retry_count + 1;

        if next >= message.max_retries {
            error!(
                notification_id = ?message.notification_id,
                retry_count = next,
                max_retries = message.max_retries,
                error = %reason,
                "Notification failed permanently"
            );
            self.fail(record.as_mut(), &reason, true).await;
            return DeliveryOutcome::Failed;
        }

        if let Some(record) = record.as_mut() {
            match record.mark_retrying(reason.as_str()) {
                Ok(()) => self.save(record).await,
                Err(e) => warn!(error = %e, "Could not mark notification as retrying"),
            }
        }

        message.retry_count = next;

        match self.producer.requeue(message, destination).await {
            Ok(RequeueOutcome::Requeued) => {
                warn!(retry_count = next, error = %reason, "Notification scheduled for retry");
                DeliveryOutcome::Retrying { retry_count: next }
            }
            Ok(RequeueOutcome::Exhausted) => {
                self.fail(record.as_mut(), &reason, false).await;
                DeliveryOutcome::Failed
            }
            Err(e) => {
                error!(error = %e, "Requeue publish failed");
                self.fail(record.as_mut(), &e.to_string(), false).await;
                DeliveryOutcome::Failed
            }
        }
    }

    async fn fail(&self, record: Option<&mut NotificationRecord>, reason: &str, consumed_attempt: bool) {
        if let Some(record) = record {
            match record.mark_failed(reason, consumed_attempt) {
                Ok(()) => self.save(record).await,
                Err(e) => warn!(error = %e, "Could not mark notification as failed"),
            }
        }
    }

    /// Fills recipient and property details a property message arrived without.
    async fn enrich(&self, message: &mut NotificationMessage) {
        if message.user_email.as_deref().is_none_or(str::is_empty) {
            if let Some(user_id) = message.user_id {
                let user = self.user_client.get_user_by_id(user_id).await;
                message.user_email = Some(user.email.clone());
                message.user_first_name = message.user_first_name.take().or(user.first_name);
                message.user_last_name = message.user_last_name.take().or(user.last_name);
                message.user_name = message.user_name.take().or(user.username);
            }
        }

        if message.property_title.is_some() {
            return;
        }

        let Some(property_id) = message.property_id else {
            return;
        };

        let property = self.property_client.get_property_by_id(property_id).await;
        let url = property_url(&self.frontend_base_url, property_id);

        if message.message.as_deref().is_none_or(str::is_empty) {
            message.message = Some(build_property_message(&property, &url));
        }

        let images = property.images();
        message.property_title = property.title;
        message.property_address = message.property_address.take().or(property.address);
        message.property_price = message.property_price.or(property.rent_amount);
        message.property_image_url = images.first().cloned();
        message.property_image_url2 = images.get(1).cloned();
        message.property_image_url3 = images.get(2).cloned();
        message.property_url = Some(url);
    }

    async fn link_record(&self, message: &NotificationMessage) -> Option<NotificationRecord> {
        let lookup = match (message.notification_id, message.user_id) {
            (Some(id), _) => self.store.find_by_id(id).await,
            (None, Some(user_id)) => {
                self.store
                    .find_latest_by_user_and_statuses(user_id, &NotificationStatus::IN_FLIGHT)
                    .await
            }
            (None, None) => Ok(None),
        };

        match lookup {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                debug!(
                    notification_id = ?message.notification_id,
                    "No notification record linked, delivering untracked"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, "Record lookup failed, delivering untracked");
                None
            }
        }
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<(), Error> {
        let to = message
            .user_email
            .as_deref()
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| anyhow!("Notification has no recipient email"))?;

        let subject = message
            .subject
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(message.property_title.as_deref())
            .unwrap_or(DEFAULT_SUBJECT);

        match message.html_content.as_deref().filter(|html| !html.is_empty()) {
            Some(html) => self.email_sender.send_html(to, subject, html).await,
            None => {
                let body = message.message.as_deref().unwrap_or_default();
                self.email_sender.send_plain(to, subject, body).await
            }
        }
    }

    async fn save(&self, record: &NotificationRecord) {
        if let Err(e) = self.store.update(record).await {
            error!(notification_id = %record.id, error = %e, "Failed to persist notification status");
        }
    }

    /// Starts `concurrency` workers on each notification queue. Workers stop pulling
    /// deliveries once `shutdown` flips to true.
    pub async fn spawn_workers(
        self: Arc<Self>,
        broker: &RabbitMqClient,
        topology: &QueueTopology,
        concurrency: usize,
        prefetch_count: u16,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>, Error> {
        let mut handles = Vec::new();

        for destination in Destination::ALL {
            let queue = topology.queue_name(destination);

            for index in 0..concurrency {
                let tag = format!("{}-worker-{}", destination, index);
                let worker = broker.create_consumer(queue, &tag, prefetch_count).await?;

                handles.push(tokio::spawn(run_worker(
                    Arc::clone(&self),
                    destination,
                    worker,
                    shutdown.clone(),
                )));
            }

            info!(queue, concurrency, "Notification consumers started");
        }

        Ok(handles)
    }
}

async fn run_worker(
    consumer: Arc<NotificationConsumer>,
    destination: Destination,
    mut worker: QueueWorker,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let delivery = tokio::select! {
            _ = shutdown.changed() => break,
            delivery = worker.consumer.next() => delivery,
        };

        let delivery = match delivery {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => {
                error!(queue = %destination, error = %e, "Consumer stream error");
                continue;
            }
            None => break,
        };

        let outcome = consumer.handle(destination, &delivery.data).await;

        let settled = if outcome.acknowledges() {
            worker.acknowledge(delivery.delivery_tag).await
        } else {
            worker.reject(delivery.delivery_tag, false).await
        };

        if let Err(e) = settled {
            error!(queue = %destination, error = %e, "Failed to settle delivery");
        }
    }

    info!(queue = %destination, "Notification consumer stopped");
}
