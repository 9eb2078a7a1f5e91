use std::sync::Arc;

use anyhow::Result;
use notification_service::{
    models::{
        message::{Destination, NotificationMessage},
        notification::NotificationRecord,
    },
    producer::{NotificationProducer, RequeueOutcome},
};
use uuid::Uuid;

use crate::common::{RecordingPublisher, request, topology};

fn producer(publisher: &Arc<RecordingPublisher>) -> NotificationProducer {
    NotificationProducer::new(publisher.clone(), topology(), 3)
}

/// Test: Published messages start at retry 0 and carry the record id
#[tokio::test]
async fn test_publish_builds_fresh_message() -> Result<()> {
    let publisher = Arc::new(RecordingPublisher::default());
    let producer = producer(&publisher);
    let id = Uuid::new_v4();

    let message = producer
        .publish(&request(1), Some(id), Destination::General)
        .await?;

    assert_eq!(message.notification_id, Some(id));
    assert_eq!(message.retry_count, 0);
    assert_eq!(message.max_retries, 3);

    let published = publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "notification.send");
    assert_eq!(published[0].1, message);

    Ok(())
}

/// Test: Each destination publishes with its own routing key
#[tokio::test]
async fn test_destinations_use_their_routing_keys() -> Result<()> {
    let publisher = Arc::new(RecordingPublisher::default());
    let producer = producer(&publisher);

    for destination in Destination::ALL {
        producer.publish(&request(2), None, destination).await?;
    }

    let keys: Vec<_> = publisher.published().into_iter().map(|(key, _)| key).collect();
    assert_eq!(
        keys,
        vec!["notification.send", "notification.email", "notification.property"]
    );

    Ok(())
}

/// Test: Broker failures propagate to the caller
#[tokio::test]
async fn test_publish_failure_propagates() -> Result<()> {
    let publisher = Arc::new(RecordingPublisher::default());
    publisher.set_failing(true);
    let producer = producer(&publisher);

    let result = producer.publish(&request(3), None, Destination::General).await;

    assert!(result.is_err());
    assert_eq!(publisher.count(), 0);

    Ok(())
}

/// Test: Requeue republishes below the limit with a refreshed timestamp
#[tokio::test]
async fn test_requeue_below_limit() -> Result<()> {
    let publisher = Arc::new(RecordingPublisher::default());
    let producer = producer(&publisher);

    let mut message = NotificationMessage::from_request(&request(4), None, 3);
    message.retry_count = 2;
    message.timestamp -= chrono::Duration::minutes(5);
    let original_timestamp = message.timestamp;

    let outcome = producer
        .requeue(message.clone(), Destination::PropertyNotification)
        .await?;

    assert_eq!(outcome, RequeueOutcome::Requeued);
    let (key, requeued) = publisher.last().expect("requeued message");
    assert_eq!(key, "notification.property");
    assert_eq!(requeued.retry_count, 2);
    assert!(requeued.timestamp > original_timestamp);

    Ok(())
}

/// Test: Exhausted messages are not published again
#[tokio::test]
async fn test_requeue_exhausted_is_not_published() -> Result<()> {
    let publisher = Arc::new(RecordingPublisher::default());
    let producer = producer(&publisher);

    let mut message = NotificationMessage::from_request(&request(5), None, 3);
    message.retry_count = 3;

    let outcome = producer.requeue(message, Destination::General).await?;

    assert_eq!(outcome, RequeueOutcome::Exhausted);
    assert_eq!(publisher.count(), 0);

    Ok(())
}

/// Test: Republishing a record keeps its retry count
#[tokio::test]
async fn test_republish_keeps_record_retry_count() -> Result<()> {
    let publisher = Arc::new(RecordingPublisher::default());
    let producer = producer(&publisher);

    let mut record = NotificationRecord::pending(&request(6));
    record.mark_processing()?;
    record.mark_failed("SMTP send failed", true)?;

    let message = producer.republish(&record, Destination::General).await?;

    assert_eq!(message.notification_id, Some(record.id));
    assert_eq!(message.retry_count, 1);
    assert_eq!(message.subject.as_deref(), Some("Welcome aboard"));

    Ok(())
}
