use std::collections::HashMap;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::models::{
    notification::{NotificationRecord, PropertyContext},
    status::NotificationStatus,
};

const SCHEMA: &str = include_str!("../../migrations/001_create_notifications.sql");

const RECORD_COLUMNS: &str = "id, user_id, user_email, user_name, notification_type, subject, \
     message, html_content, property_id, property_title, property_address, property_image_url, \
     property_image_url2, property_image_url3, property_price, property_url, status, sent_at, \
     retry_count, error_message, created_at, updated_at";

/// Durable record of every notification attempt and its delivery status.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, record: &NotificationRecord) -> Result<Uuid, Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<NotificationRecord>, Error>;

    /// Most recently created record of `user_id` whose status is one of `statuses`.
    async fn find_latest_by_user_and_statuses(
        &self,
        user_id: i64,
        statuses: &[NotificationStatus],
    ) -> Result<Option<NotificationRecord>, Error>;

    /// Overwrites the stored record. Last write wins.
    async fn update(&self, record: &NotificationRecord) -> Result<(), Error>;

    async fn delete(&self, id: Uuid) -> Result<bool, Error>;

    async fn count_by_status(&self, status: NotificationStatus) -> Result<u64, Error>;

    /// Counts for every status, taken from a single read.
    async fn status_counts(&self) -> Result<HashMap<NotificationStatus, u64>, Error>;

    /// PENDING records, and FAILED records whose retry count is below `max_retries`.
    async fn find_retryable(&self, max_retries: u32) -> Result<Vec<NotificationRecord>, Error>;

    async fn find_by_user(&self, user_id: i64) -> Result<Vec<NotificationRecord>, Error>;

    async fn find_by_status(
        &self,
        status: NotificationStatus,
    ) -> Result<Vec<NotificationRecord>, Error>;

    async fn health_check(&self) -> Result<(), Error>;
}

pub struct DatabaseClient {
    client: Client,
}

impl DatabaseClient {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| anyhow!("Failed to apply notifications schema: {}", e))?;

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    async fn query_records(
        &self,
        filter: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<NotificationRecord>, Error> {
        let sql = format!("SELECT {} FROM notifications {}", RECORD_COLUMNS, filter);

        let rows = self
            .client
            .query(sql.as_str(), params)
            .await
            .map_err(|e| anyhow!("Notification query failed: {}", e))?;

        rows.iter().map(row_to_record).collect()
    }
}

#[async_trait]
impl NotificationStore for DatabaseClient {
    async fn insert(&self, record: &NotificationRecord) -> Result<Uuid, Error> {
        let property = record.property.clone().unwrap_or_default();
        let retry_count = record.retry_count as i32;
        let notification_type = record.notification_type.as_str();
        let status = record.status.as_str();
        let image_url = property.image(0);
        let image_url2 = property.image(1);
        let image_url3 = property.image(2);

        self.client
            .execute(
                r#"
                INSERT INTO notifications (
                    id, user_id, user_email, user_name, notification_type, subject, message,
                    html_content, property_id, property_title, property_address,
                    property_image_url, property_image_url2, property_image_url3,
                    property_price, property_url, status, sent_at, retry_count,
                    error_message, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                        $16, $17, $18, $19, $20, $21, $22)
                "#,
                &[
                    &record.id,
                    &record.user_id,
                    &record.user_email,
                    &record.user_name,
                    &notification_type,
                    &record.subject,
                    &record.message,
                    &record.html_content,
                    &property.property_id,
                    &property.title,
                    &property.address,
                    &image_url,
                    &image_url2,
                    &image_url3,
                    &property.price,
                    &property.url,
                    &status,
                    &record.sent_at,
                    &retry_count,
                    &record.error_message,
                    &record.created_at,
                    &record.updated_at,
                ],
            )
            .await
            .map_err(|e| {
                error!(error = %e, notification_id = %record.id, "Failed to insert notification");
                anyhow!("Database write failed: {}", e)
            })?;

        debug!(notification_id = %record.id, "Notification record inserted");
        Ok(record.id)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<NotificationRecord>, Error> {
        let mut records = self.query_records("WHERE id = $1", &[&id]).await?;
        Ok(records.pop())
    }

    async fn find_latest_by_user_and_statuses(
        &self,
        user_id: i64,
        statuses: &[NotificationStatus],
    ) -> Result<Option<NotificationRecord>, Error> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let mut records = self
            .query_records(
                "WHERE user_id = $1 AND status = ANY($2) ORDER BY created_at DESC LIMIT 1",
                &[&user_id, &statuses],
            )
            .await?;
        Ok(records.pop())
    }

    async fn update(&self, record: &NotificationRecord) -> Result<(), Error> {
        let retry_count = record.retry_count as i32;
        let status = record.status.as_str();

        self.client
            .execute(
                r#"
                UPDATE notifications
                SET status = $2, sent_at = $3, retry_count = $4, error_message = $5,
                    updated_at = $6
                WHERE id = $1
                "#,
                &[
                    &record.id,
                    &status,
                    &record.sent_at,
                    &retry_count,
                    &record.error_message,
                    &record.updated_at,
                ],
            )
            .await
            .map_err(|e| {
                error!(error = %e, notification_id = %record.id, "Failed to update notification");
                anyhow!("Database write failed: {}", e)
            })?;

        debug!(
            notification_id = %record.id,
            status = %record.status,
            "Notification status updated"
        );
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, Error> {
        let deleted = self
            .client
            .execute("DELETE FROM notifications WHERE id = $1", &[&id])
            .await
            .map_err(|e| anyhow!("Database delete failed: {}", e))?;

        Ok(deleted > 0)
    }

    async fn count_by_status(&self, status: NotificationStatus) -> Result<u64, Error> {
        let status = status.as_str();
        let row = self
            .client
            .query_one(
                "SELECT COUNT(*) AS count FROM notifications WHERE status = $1",
                &[&status],
            )
            .await
            .map_err(|e| anyhow!("Count query failed: {}", e))?;

        let count: i64 = row.try_get("count")?;
        Ok(count.max(0) as u64)
    }

    async fn status_counts(&self) -> Result<HashMap<NotificationStatus, u64>, Error> {
        let rows = self
            .client
            .query(
                "SELECT status, COUNT(*) AS count FROM notifications GROUP BY status",
                &[],
            )
            .await
            .map_err(|e| anyhow!("Count query failed: {}", e))?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            counts.insert(status.parse()?, count.max(0) as u64);
        }

        Ok(counts)
    }

    async fn find_retryable(&self, max_retries: u32) -> Result<Vec<NotificationRecord>, Error> {
        let max_retries = max_retries as i32;

        self.query_records(
            "WHERE status = 'PENDING' OR (status = 'FAILED' AND retry_count < $1) \
             ORDER BY created_at",
            &[&max_retries],
        )
        .await
    }

    async fn find_by_user(&self, user_id: i64) -> Result<Vec<NotificationRecord>, Error> {
        self.query_records("WHERE user_id = $1 ORDER BY created_at DESC", &[&user_id])
            .await
    }

    async fn find_by_status(
        &self,
        status: NotificationStatus,
    ) -> Result<Vec<NotificationRecord>, Error> {
        let status = status.as_str();
        self.query_records("WHERE status = $1 ORDER BY created_at DESC", &[&status])
            .await
    }

    async fn health_check(&self) -> Result<(), Error> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}

fn row_to_record(row: &Row) -> Result<NotificationRecord, Error> {
    let notification_type: String = row.try_get("notification_type")?;
    let status: String = row.try_get("status")?;
    let retry_count: i32 = row.try_get("retry_count")?;

    let property = PropertyContext {
        property_id: row.try_get("property_id")?,
        title: row.try_get("property_title")?,
        address: row.try_get("property_address")?,
        image_urls: Vec::new(),
        price: row.try_get("property_price")?,
        url: row.try_get("property_url")?,
    }
    .with_images(
        [
            row.try_get::<_, Option<String>>("property_image_url")?,
            row.try_get::<_, Option<String>>("property_image_url2")?,
            row.try_get::<_, Option<String>>("property_image_url3")?,
        ]
        .into_iter()
        .flatten(),
    );

    Ok(NotificationRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        user_email: row.try_get("user_email")?,
        user_name: row.try_get("user_name")?,
        notification_type: notification_type.parse()?,
        subject: row.try_get("subject")?,
        message: row.try_get("message")?,
        html_content: row.try_get("html_content")?,
        property: (property != PropertyContext::default()).then_some(property),
        status: status.parse()?,
        sent_at: row.try_get("sent_at")?,
        retry_count: retry_count.max(0) as u32,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
