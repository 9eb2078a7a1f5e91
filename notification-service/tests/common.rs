use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use notification_service::{
    clients::{
        circuit_breaker::CircuitBreakerRegistry,
        dependency::{PropertyServiceClient, UserServiceClient},
        email::EmailSender,
        memory::InMemoryNotificationStore,
        rbmq::MessagePublisher,
    },
    config::QueueTopology,
    consumer::NotificationConsumer,
    models::{
        circuit_breaker::CircuitBreakerConfig,
        message::NotificationMessage,
        notification::NotificationRequest,
        retry::RetryConfig,
        status::NotificationType,
    },
    producer::NotificationProducer,
    service::NotificationService,
};
use parking_lot::Mutex;
use wiremock::MockServer;

pub const FRONTEND_URL: &str = "http://localhost:5173";

pub fn topology() -> QueueTopology {
    QueueTopology {
        exchange: "notification.exchange".to_string(),
        dead_letter_exchange: "notification.dlx".to_string(),
        dead_letter_queue: "notification.dlq".to_string(),
        dead_letter_routing_key: "notification.dead".to_string(),
        notification_queue: "notification.queue".to_string(),
        email_queue: "email.queue".to_string(),
        property_notification_queue: "property-notification.queue".to_string(),
        notification_routing_key: "notification.send".to_string(),
        email_routing_key: "notification.email".to_string(),
        property_notification_routing_key: "notification.property".to_string(),
        event_queues: vec!["appointment-queue".to_string(), "booking-queue".to_string()],
        notification_message_ttl_ms: 300_000,
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 1,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2,
    }
}

pub fn request(user_id: i64) -> NotificationRequest {
    NotificationRequest::new(
        user_id,
        format!("student{}@example.com", user_id),
        NotificationType::Welcome,
        "Welcome aboard",
        "Thanks for signing up.",
    )
}

/// Publisher that keeps every message instead of talking to a broker.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, NotificationMessage)>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, NotificationMessage)> {
        self.published.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.published.lock().len()
    }

    pub fn last(&self) -> Option<(String, NotificationMessage)> {
        self.published.lock().last().cloned()
    }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("Broker unavailable"));
        }

        let message: NotificationMessage = serde_json::from_slice(payload)?;
        self.published
            .lock()
            .push((routing_key.to_string(), message));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub html: bool,
}

/// Email sender that fails the next `fail_next` sends, or every send once
/// `always_fail` is set.
#[derive(Default)]
pub struct ScriptedEmailSender {
    sent: Mutex<Vec<SentEmail>>,
    fail_next: AtomicU32,
    always_fail: AtomicBool,
    attempts: AtomicU32,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedEmailSender {
    pub fn failing() -> Self {
        let sender = Self::default();
        sender.always_fail.store(true, Ordering::SeqCst);
        sender
    }

    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    async fn record(&self, to: &str, subject: &str, body: &str, html: bool) -> Result<(), Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.always_fail.load(Ordering::SeqCst) {
            return Err(anyhow!("SMTP send failed: connection refused"));
        }

        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(anyhow!("SMTP send failed: mailbox busy"));
        }

        self.sent.lock().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            html,
        });
        Ok(())
    }
}

#[async_trait]
impl EmailSender for ScriptedEmailSender {
    async fn send_plain(&self, to: &str, subject: &str, body: &str) -> Result<(), Error> {
        self.record(to, subject, body, false).await
    }

    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<(), Error> {
        self.record(to, subject, html, true).await
    }
}

/// Everything the pipeline needs, wired with in-process fakes and mock dependency services.
pub struct Harness {
    pub store: Arc<InMemoryNotificationStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub email: Arc<ScriptedEmailSender>,
    pub registry: Arc<CircuitBreakerRegistry>,
    pub user_server: MockServer,
    pub property_server: MockServer,
    pub producer: Arc<NotificationProducer>,
    pub consumer: NotificationConsumer,
    pub service: Arc<NotificationService>,
}

impl Harness {
    pub async fn new(max_retries: u32) -> Result<Self> {
        Self::with_email(max_retries, ScriptedEmailSender::default()).await
    }

    pub async fn with_email(max_retries: u32, email: ScriptedEmailSender) -> Result<Self> {
        let store = Arc::new(InMemoryNotificationStore::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let email = Arc::new(email);
        let registry = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));

        let user_server = MockServer::start().await;
        let property_server = MockServer::start().await;
        let timeout = Duration::from_secs(2);

        let user_client = Arc::new(UserServiceClient::new(
            &user_server.uri(),
            timeout,
            fast_retry(),
            &registry,
        )?);
        let property_client = Arc::new(PropertyServiceClient::new(
            &property_server.uri(),
            timeout,
            fast_retry(),
            &registry,
        )?);

        let producer = Arc::new(NotificationProducer::new(
            publisher.clone(),
            topology(),
            max_retries,
        ));

        let consumer = NotificationConsumer::new(
            store.clone(),
            Arc::clone(&producer),
            email.clone(),
            Arc::clone(&user_client),
            Arc::clone(&property_client),
            FRONTEND_URL,
        );

        let service = Arc::new(NotificationService::new(
            store.clone(),
            Arc::clone(&producer),
            user_client,
            property_client,
            FRONTEND_URL,
        ));

        Ok(Self {
            store,
            publisher,
            email,
            registry,
            user_server,
            property_server,
            producer,
            consumer,
            service,
        })
    }

    pub fn last_message(&self) -> Result<NotificationMessage> {
        self.publisher
            .last()
            .map(|(_, message)| message)
            .ok_or_else(|| anyhow!("nothing was published"))
    }
}
