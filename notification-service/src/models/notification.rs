use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::InvalidTransition,
    models::status::{NotificationStatus, NotificationType},
};

pub const MAX_PROPERTY_IMAGES: usize = 3;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyContext {
    pub property_id: Option<i64>,
    pub title: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub price: Option<f64>,
    pub url: Option<String>,
}

impl PropertyContext {
    /// Keeps the first three non-empty image URLs.
    pub fn with_images<I>(mut self, images: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.image_urls = images
            .into_iter()
            .filter(|url| !url.trim().is_empty())
            .take(MAX_PROPERTY_IMAGES)
            .collect();
        self
    }

    pub fn image(&self, index: usize) -> Option<String> {
        self.image_urls.get(index).cloned()
    }
}

/// A delivery request accepted at the boundary of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub user_id: i64,
    pub user_email: String,
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_first_name: Option<String>,
    #[serde(default)]
    pub user_last_name: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub subject: String,
    pub message: String,
    pub html_content: Option<String>,
    #[serde(default)]
    pub property: Option<PropertyContext>,
}

impl NotificationRequest {
    pub fn new(
        user_id: i64,
        user_email: impl Into<String>,
        notification_type: NotificationType,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            user_email: user_email.into(),
            user_name: None,
            user_first_name: None,
            user_last_name: None,
            notification_type,
            subject: subject.into(),
            message: message.into(),
            html_content: None,
            property: None,
        }
    }

    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    pub fn with_html(mut self, html_content: impl Into<String>) -> Self {
        self.html_content = Some(html_content.into());
        self
    }

    pub fn with_property(mut self, property: PropertyContext) -> Self {
        self.property = Some(property);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: Uuid,
    pub user_id: i64,
    pub user_email: String,
    pub user_name: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub subject: String,
    pub message: String,
    pub html_content: Option<String>,
    pub property: Option<PropertyContext>,
    pub status: NotificationStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn pending(request: &NotificationRequest) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            user_email: request.user_email.clone(),
            user_name: request.user_name.clone(),
            notification_type: request.notification_type,
            subject: request.subject.clone(),
            message: request.message.clone(),
            html_content: request.html_content.clone(),
            property: request.property.clone(),
            status: NotificationStatus::Pending,
            sent_at: None,
            retry_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds the delivery request this record was created from.
    pub fn to_request(&self) -> NotificationRequest {
        NotificationRequest {
            user_id: self.user_id,
            user_email: self.user_email.clone(),
            user_name: self.user_name.clone(),
            user_first_name: None,
            user_last_name: None,
            notification_type: self.notification_type,
            subject: self.subject.clone(),
            message: self.message.clone(),
            html_content: self.html_content.clone(),
            property: self.property.clone(),
        }
    }

    pub fn mark_processing(&mut self) -> Result<(), InvalidTransition> {
        self.transition(NotificationStatus::Processing)
    }

    pub fn mark_sent(&mut self) -> Result<(), InvalidTransition> {
        self.transition(NotificationStatus::Sent)?;
        self.sent_at = Some(self.updated_at);
        Ok(())
    }

    /// Transient failure: one more attempt has been consumed.
    pub fn mark_retrying(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(NotificationStatus::Retrying)?;
        self.retry_count += 1;
        self.error_message = Some(error.into());
        Ok(())
    }

    /// Terminal failure. `consumed_attempt` is false when the failure did not use up
    /// a delivery attempt (publish errors, email-only policy).
    pub fn mark_failed(
        &mut self,
        error: impl Into<String>,
        consumed_attempt: bool,
    ) -> Result<(), InvalidTransition> {
        self.transition(NotificationStatus::Failed)?;
        if consumed_attempt {
            self.retry_count += 1;
        }
        self.error_message = Some(error.into());
        Ok(())
    }

    /// Puts a FAILED or PENDING record back into circulation without touching retry_count.
    pub fn mark_resubmitted(&mut self) -> Result<(), InvalidTransition> {
        self.transition(NotificationStatus::Retrying)
    }

    fn transition(&mut self, next: NotificationStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        self.updated_at = Utc::now().max(self.updated_at);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStatistics {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub sent: u64,
    pub failed: u64,
    pub retrying: u64,
}

impl NotificationStatistics {
    pub fn from_counts(counts: &HashMap<NotificationStatus, u64>) -> Self {
        let count = |status| counts.get(&status).copied().unwrap_or(0);

        let pending = count(NotificationStatus::Pending);
        let processing = count(NotificationStatus::Processing);
        let sent = count(NotificationStatus::Sent);
        let failed = count(NotificationStatus::Failed);
        let retrying = count(NotificationStatus::Retrying);

        Self {
            total: pending + processing + sent + failed + retrying,
            pending,
            processing,
            sent,
            failed,
            retrying,
        }
    }
}
