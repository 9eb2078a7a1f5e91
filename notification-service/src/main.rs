use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result};
use futures_util::future::join_all;
use notification_service::{
    api::{AppState, run_api_server},
    clients::{
        circuit_breaker::CircuitBreakerRegistry,
        database::{DatabaseClient, NotificationStore},
        dependency::{PropertyServiceClient, UserServiceClient},
        email::{EmailSender, SmtpEmailSender},
        health::HealthChecker,
        memory::InMemoryNotificationStore,
        rbmq::RabbitMqClient,
    },
    config::Config,
    consumer::NotificationConsumer,
    dispatch::EmailDispatcher,
    events::{EventKind, SagaEventHandler},
    producer::NotificationProducer,
    service::NotificationService,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load()?;
    info!("Configuration loaded");

    let store: Arc<dyn NotificationStore> = if config.database_url.is_empty() {
        warn!("DATABASE_URL not set, notification records are kept in memory");
        Arc::new(InMemoryNotificationStore::new())
    } else {
        Arc::new(DatabaseClient::connect(&config.database_url).await?)
    };

    let topology = config.queue_topology();
    let broker =
        Arc::new(RabbitMqClient::connect(&config.rabbitmq_url, &topology.exchange).await?);
    broker.declare_topology(&topology).await?;

    let registry = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker_config()));
    let timeout = Duration::from_secs(config.http_timeout_seconds);
    let user_client = Arc::new(UserServiceClient::new(
        &config.user_service_url,
        timeout,
        config.retry_config(),
        &registry,
    )?);
    let property_client = Arc::new(PropertyServiceClient::new(
        &config.property_service_url,
        timeout,
        config.retry_config(),
        &registry,
    )?);

    let email_sender: Arc<dyn EmailSender> = Arc::new(SmtpEmailSender::new(&config)?);
    let dispatcher = Arc::new(EmailDispatcher::start(
        Arc::clone(&email_sender),
        config.email_workers(),
        config.email_queue_capacity,
    ));

    let producer = Arc::new(NotificationProducer::new(
        broker.clone(),
        topology.clone(),
        config.max_delivery_retries,
    ));

    let consumer = Arc::new(NotificationConsumer::new(
        Arc::clone(&store),
        Arc::clone(&producer),
        email_sender,
        Arc::clone(&user_client),
        Arc::clone(&property_client),
        &config.frontend_base_url,
    ));

    let service = Arc::new(NotificationService::new(
        Arc::clone(&store),
        producer,
        user_client,
        property_client,
        &config.frontend_base_url,
    ));

    match service.statistics().await {
        Ok(stats) => info!(
            total = stats.total,
            pending = stats.pending,
            failed = stats.failed,
            retrying = stats.retrying,
            "Notification records at startup"
        ),
        Err(e) => warn!(error = %e, "Could not read notification statistics"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut workers = consumer
        .spawn_workers(
            &broker,
            &topology,
            config.consumer_concurrency(),
            config.prefetch_count,
            shutdown_rx.clone(),
        )
        .await?;

    let saga_handler = Arc::new(SagaEventHandler::new(
        Arc::clone(&dispatcher),
        &config.frontend_base_url,
    ));
    let event_queues = [
        (EventKind::Appointment, config.appointment_queue_name.clone()),
        (EventKind::Booking, config.booking_queue_name.clone()),
    ];
    workers.extend(
        saga_handler
            .spawn_workers(&broker, &event_queues, config.prefetch_count, shutdown_rx.clone())
            .await?,
    );

    let state = Arc::new(AppState {
        health_checker: HealthChecker::new(store, Some(Arc::clone(&broker)), Arc::clone(&registry)),
        registry,
        service,
    });
    let server = tokio::spawn(run_api_server(state, config.server_port, shutdown_rx));

    info!("Notification service started");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    join_all(workers).await;
    dispatcher.shutdown(DISPATCHER_DRAIN_TIMEOUT).await;

    match server.await {
        Ok(Err(e)) => error!(error = %e, "Health check server exited with error"),
        Err(e) => error!(error = %e, "Health check server task panicked"),
        Ok(Ok(())) => {}
    }

    info!("Notification service stopped");
    Ok(())
}
