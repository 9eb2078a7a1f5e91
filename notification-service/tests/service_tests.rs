use anyhow::Result;
use notification_service::{
    clients::database::NotificationStore,
    error::ServiceError,
    models::{
        message::Destination,
        notification::NotificationRecord,
        status::NotificationStatus,
    },
};
use serde_json::json;
use uuid::Uuid;
use wiremock::{
    Mock, ResponseTemplate,
    matchers::{method, path},
};

use crate::common::{Harness, ScriptedEmailSender, request};

/// Test: Enqueue persists a PENDING record and publishes it to the general queue
#[tokio::test]
async fn test_enqueue_creates_pending_record() -> Result<()> {
    let harness = Harness::new(3).await?;
    let before = harness.service.statistics().await?;

    let record = harness.service.enqueue(request(1)).await?;

    assert_eq!(record.status, NotificationStatus::Pending);
    assert_eq!(record.retry_count, 0);

    let after = harness.service.statistics().await?;
    assert_eq!(after.pending, before.pending + 1);
    assert_eq!(after.total, before.total + 1);

    let (key, message) = harness.publisher.last().expect("published");
    assert_eq!(key, "notification.send");
    assert_eq!(message.notification_id, Some(record.id));
    assert_eq!(message.retry_count, 0);
    assert_eq!(message.max_retries, 3);

    Ok(())
}

/// Test: Invalid requests are refused and nothing is stored
#[tokio::test]
async fn test_enqueue_rejects_invalid_request() -> Result<()> {
    let harness = Harness::new(3).await?;

    let mut blank_subject = request(2);
    blank_subject.subject = "   ".to_string();
    let mut bad_email = request(2);
    bad_email.user_email = "not-an-email".to_string();

    for invalid in [blank_subject, bad_email] {
        let result = harness.service.enqueue(invalid).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    assert!(harness.store.is_empty());
    assert_eq!(harness.publisher.count(), 0);

    Ok(())
}

/// Test: A publish failure leaves the record FAILED and surfaces the error
#[tokio::test]
async fn test_enqueue_publish_failure_marks_failed() -> Result<()> {
    let harness = Harness::new(3).await?;
    harness.publisher.set_failing(true);

    let result = harness.service.enqueue(request(3)).await;
    assert!(matches!(result, Err(ServiceError::Publish(_))));

    let failed = harness
        .service
        .notifications_by_status(NotificationStatus::Failed)
        .await?;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 0);
    assert_eq!(failed[0].error_message.as_deref(), Some("Broker unavailable"));

    Ok(())
}

/// Test: Email-only enqueue routes to the email queue
#[tokio::test]
async fn test_enqueue_email_uses_email_queue() -> Result<()> {
    let harness = Harness::new(3).await?;

    harness.service.enqueue_email(request(4)).await?;

    let (key, _) = harness.publisher.last().expect("published");
    assert_eq!(key, "notification.email");

    Ok(())
}

/// Test: Statistics are stable without mutation and partition the total
#[tokio::test]
async fn test_statistics_are_consistent() -> Result<()> {
    let harness = Harness::with_email(3, ScriptedEmailSender::default()).await?;

    for user_id in 0..3 {
        harness.service.enqueue(request(user_id)).await?;
    }
    let message = harness.last_message()?;
    harness.consumer.handle(Destination::General, &serde_json::to_vec(&message)?).await;

    let first = harness.service.statistics().await?;
    let second = harness.service.statistics().await?;

    assert_eq!(first, second);
    assert_eq!(first.total, 3);
    assert_eq!(first.pending, 2);
    assert_eq!(first.sent, 1);
    assert_eq!(
        first.pending + first.processing + first.sent + first.failed + first.retrying,
        first.total
    );

    Ok(())
}

/// Test: Unknown ids surface NotFound for reads and deletes
#[tokio::test]
async fn test_unknown_id_is_not_found() -> Result<()> {
    let harness = Harness::new(3).await?;
    let id = Uuid::new_v4();

    assert!(matches!(
        harness.service.get_notification(id).await,
        Err(ServiceError::NotFound(missing)) if missing == id
    ));
    assert!(matches!(
        harness.service.delete_notification(id).await,
        Err(ServiceError::NotFound(_))
    ));

    Ok(())
}

/// Test: Records can be read by id and user, and deleted
#[tokio::test]
async fn test_read_and_delete_operations() -> Result<()> {
    let harness = Harness::new(3).await?;
    let first = harness.service.enqueue(request(5)).await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = harness.service.enqueue(request(5)).await?;
    harness.service.enqueue(request(6)).await?;

    assert_eq!(harness.service.get_notification(first.id).await?, first);

    let ids: Vec<_> = harness
        .service
        .user_notifications(5)
        .await?
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec![second.id, first.id], "Newest first");

    harness.service.delete_notification(first.id).await?;
    assert_eq!(harness.service.user_notifications(5).await?.len(), 1);

    Ok(())
}

/// Test: retry_failed republishes FAILED records below the limit and PENDING ones
#[tokio::test]
async fn test_retry_failed_republishes_candidates() -> Result<()> {
    let harness = Harness::new(3).await?;

    let pending = harness.service.enqueue(request(7)).await?;

    let mut retryable = NotificationRecord::pending(&request(8));
    retryable.mark_processing()?;
    retryable.mark_failed("SMTP send failed", true)?;
    harness.store.insert(&retryable).await?;

    let mut exhausted = NotificationRecord::pending(&request(9));
    exhausted.retry_count = 2;
    exhausted.mark_processing()?;
    exhausted.mark_failed("SMTP send failed", true)?;
    harness.store.insert(&exhausted).await?;

    let published_before = harness.publisher.count();
    let processed = harness.service.retry_failed(3).await?;

    assert_eq!(processed.len(), 2);
    assert!(processed.iter().all(|r| r.status == NotificationStatus::Retrying));
    let returned_retry_count = processed
        .iter()
        .find(|r| r.id == retryable.id)
        .map(|r| r.retry_count);
    assert_eq!(returned_retry_count, Some(1));
    assert!(processed.iter().all(|r| r.id != exhausted.id));
    assert_eq!(harness.publisher.count(), published_before + 2);

    let retried = harness.store.find_by_id(retryable.id).await?.expect("exists");
    assert_eq!(retried.status, NotificationStatus::Retrying);
    assert_eq!(retried.retry_count, 1, "retry count is not reset");

    let resubmitted = harness.store.find_by_id(pending.id).await?.expect("exists");
    assert_eq!(resubmitted.status, NotificationStatus::Retrying);

    let untouched = harness.store.find_by_id(exhausted.id).await?.expect("exists");
    assert_eq!(untouched.status, NotificationStatus::Failed);
    assert_eq!(untouched.retry_count, 3);

    let republished_retry_counts: Vec<_> = harness
        .publisher
        .published()
        .into_iter()
        .skip(published_before)
        .filter(|(_, message)| message.notification_id == Some(retryable.id))
        .map(|(_, message)| message.retry_count)
        .collect();
    assert_eq!(republished_retry_counts, vec![1]);

    Ok(())
}

/// Test: Records whose republish fails come back FAILED with the publish error
#[tokio::test]
async fn test_retry_failed_returns_records_that_fell_back() -> Result<()> {
    let harness = Harness::new(3).await?;

    let mut failed = NotificationRecord::pending(&request(11));
    failed.mark_processing()?;
    failed.mark_failed("SMTP send failed", true)?;
    harness.store.insert(&failed).await?;

    harness.publisher.set_failing(true);
    let processed = harness.service.retry_failed(3).await?;

    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].id, failed.id);
    assert_eq!(processed[0].status, NotificationStatus::Failed);
    assert_eq!(processed[0].retry_count, 1);
    assert_eq!(processed[0].error_message.as_deref(), Some("Broker unavailable"));

    let stored = harness.store.find_by_id(failed.id).await?.expect("exists");
    assert_eq!(stored, processed[0]);

    Ok(())
}

/// Test: A record recovered by retry_failed can still be delivered
#[tokio::test]
async fn test_retry_failed_record_is_deliverable() -> Result<()> {
    let harness = Harness::new(3).await?;
    harness.publisher.set_failing(true);
    let _ = harness.service.enqueue(request(10)).await;
    harness.publisher.set_failing(false);

    let processed = harness.service.retry_failed(3).await?;
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].status, NotificationStatus::Retrying);
    assert_eq!(processed[0].retry_count, 0);

    let message = harness.last_message()?;
    harness
        .consumer
        .handle(Destination::General, &serde_json::to_vec(&message)?)
        .await;

    let stats = harness.service.statistics().await?;
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.failed, 0);

    Ok(())
}

/// Test: Property fan-out creates one record per user with property context
#[tokio::test]
async fn test_notify_new_property_fans_out() -> Result<()> {
    let harness = Harness::new(3).await?;

    Mock::given(method("GET"))
        .and(path("/api/v1/properties/31"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "propertyId": 31,
            "title": "Sunny two-bed",
            "address": "4 Harbour Street",
            "rentAmount": 900.0,
            "image": "https://img.example.com/31-a.jpg",
            "image2": "https://img.example.com/31-b.jpg",
            "image3": "https://img.example.com/31-c.jpg",
            "image4": "https://img.example.com/31-d.jpg"
        })))
        .mount(&harness.property_server)
        .await;

    for user_id in [1, 2] {
        Mock::given(method("GET"))
            .and(path(format!("/api/internal/users/id/{}", user_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": user_id,
                "email": format!("tenant{}@example.com", user_id),
                "firstName": "Tenant",
                "lastName": format!("{}", user_id)
            })))
            .mount(&harness.user_server)
            .await;
    }

    let records = harness.service.notify_new_property(31, &[1, 2]).await;

    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.subject, "New Property Available: Sunny two-bed");
        assert!(record.message.contains("Price: €900.00/month"));
        let property = record.property.clone().expect("property context");
        assert_eq!(property.image_urls.len(), 3);
        assert_eq!(property.url.as_deref(), Some("http://localhost:5173/property/31"));
    }

    let published = harness.publisher.published();
    assert_eq!(published.len(), 2);
    assert!(published.iter().all(|(key, _)| key == "notification.property"));
    assert_eq!(published[0].1.user_email.as_deref(), Some("tenant1@example.com"));
    assert_eq!(published[0].1.property_image_url3.as_deref(), Some("https://img.example.com/31-c.jpg"));

    Ok(())
}

/// Test: Users that cannot be enqueued are skipped during fan-out
#[tokio::test]
async fn test_notify_new_property_skips_failed_users() -> Result<()> {
    let harness = Harness::new(3).await?;
    harness.publisher.set_failing(true);

    let records = harness.service.notify_new_property(40, &[1, 2, 3]).await;

    assert!(records.is_empty());
    assert_eq!(
        harness.service.statistics().await?.failed,
        3,
        "Each attempted record is kept FAILED for the retry batch"
    );

    Ok(())
}
