use std::fmt::{Display, Formatter};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use uuid::Uuid;

use crate::models::{
    notification::{NotificationRecord, NotificationRequest, PropertyContext},
    status::NotificationType,
};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Queue a notification is routed to on the notification exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    General,
    EmailOnly,
    PropertyNotification,
}

impl Destination {
    pub const ALL: [Destination; 3] = [
        Destination::General,
        Destination::EmailOnly,
        Destination::PropertyNotification,
    ];

    /// Whether a failed delivery from this queue is published again.
    pub fn requeues_on_failure(&self) -> bool {
        !matches!(self, Destination::EmailOnly)
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::General => write!(f, "notification"),
            Destination::EmailOnly => write!(f, "email"),
            Destination::PropertyNotification => write!(f, "property-notification"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    #[serde(default)]
    pub notification_id: Option<Uuid>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_first_name: Option<String>,
    #[serde(default)]
    pub user_last_name: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub html_content: Option<String>,

    #[serde(default)]
    pub property_id: Option<i64>,
    #[serde(default)]
    pub property_title: Option<String>,
    #[serde(default)]
    pub property_address: Option<String>,
    #[serde(default)]
    pub property_price: Option<f64>,
    #[serde(default)]
    pub property_image_url: Option<String>,
    #[serde(default)]
    pub property_image_url2: Option<String>,
    #[serde(default)]
    pub property_image_url3: Option<String>,
    #[serde(default)]
    pub property_url: Option<String>,

    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// RFC 3339, or a local date-time without offset, which is taken as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(timestamp.with_timezone(&Utc));
    }

    raw.parse::<NaiveDateTime>()
        .map(|naive| naive.and_utc())
        .map_err(|e| de::Error::custom(format!("invalid timestamp {:?}: {}", raw, e)))
}

impl NotificationMessage {
    pub fn from_request(
        request: &NotificationRequest,
        notification_id: Option<Uuid>,
        max_retries: u32,
    ) -> Self {
        let property = request.property.clone().unwrap_or_default();

        Self {
            notification_id,
            user_id: Some(request.user_id),
            user_email: Some(request.user_email.clone()),
            user_name: request.user_name.clone(),
            user_first_name: request.user_first_name.clone(),
            user_last_name: request.user_last_name.clone(),
            notification_type: request.notification_type,
            subject: Some(request.subject.clone()),
            message: Some(request.message.clone()),
            html_content: request.html_content.clone(),
            property_id: property.property_id,
            property_title: property.title.clone(),
            property_address: property.address.clone(),
            property_price: property.price,
            property_image_url: property.image(0),
            property_image_url2: property.image(1),
            property_image_url3: property.image(2),
            property_url: property.url,
            retry_count: 0,
            max_retries,
            timestamp: Utc::now(),
        }
    }

    /// Message for a stored record, continuing from the record's retry count.
    pub fn from_record(record: &NotificationRecord, max_retries: u32) -> Self {
        let mut message = Self::from_request(&record.to_request(), Some(record.id), max_retries);
        message.retry_count = record.retry_count;
        message
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// "First Last" when either part is present, the user name otherwise.
    pub fn display_name(&self) -> Option<String> {
        let full_name = [self.user_first_name.as_deref(), self.user_last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string();

        if full_name.is_empty() {
            self.user_name.clone()
        } else {
            Some(full_name)
        }
    }

    pub fn property_context(&self) -> PropertyContext {
        PropertyContext {
            property_id: self.property_id,
            title: self.property_title.clone(),
            address: self.property_address.clone(),
            image_urls: Vec::new(),
            price: self.property_price,
            url: self.property_url.clone(),
        }
        .with_images(
            [
                self.property_image_url.clone(),
                self.property_image_url2.clone(),
                self.property_image_url3.clone(),
            ]
            .into_iter()
            .flatten(),
        )
    }
}
