use std::{
    fmt::{Display, Formatter, Result},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Retrying,
}

impl NotificationStatus {
    pub const ALL: [NotificationStatus; 5] = [
        NotificationStatus::Pending,
        NotificationStatus::Processing,
        NotificationStatus::Sent,
        NotificationStatus::Failed,
        NotificationStatus::Retrying,
    ];

    /// Statuses a consumer may still pick up when linking a message to a record by user.
    pub const IN_FLIGHT: [NotificationStatus; 3] = [
        NotificationStatus::Pending,
        NotificationStatus::Processing,
        NotificationStatus::Retrying,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "PENDING",
            NotificationStatus::Processing => "PROCESSING",
            NotificationStatus::Sent => "SENT",
            NotificationStatus::Failed => "FAILED",
            NotificationStatus::Retrying => "RETRYING",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NotificationStatus::Sent | NotificationStatus::Failed)
    }

    /// FAILED -> RETRYING is reserved for the retry-failed batch; SENT never moves.
    pub fn can_transition_to(&self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;

        matches!(
            (self, next),
            (Pending, Processing | Retrying | Failed)
                | (Processing, Processing | Sent | Retrying | Failed)
                | (Retrying, Processing | Failed)
                | (Failed, Retrying)
        )
    }
}

impl Display for NotificationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(NotificationStatus::Pending),
            "PROCESSING" => Ok(NotificationStatus::Processing),
            "SENT" => Ok(NotificationStatus::Sent),
            "FAILED" => Ok(NotificationStatus::Failed),
            "RETRYING" => Ok(NotificationStatus::Retrying),
            other => Err(anyhow::anyhow!("Unknown notification status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    NewProperty,
    PropertyUpdated,
    PriceDrop,
    AppointmentCreated,
    AppointmentConfirmed,
    AppointmentCancelled,
    BookingCreated,
    BookingConfirmed,
    PaymentReceived,
    Welcome,
    SystemNotification,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::NewProperty => "NEW_PROPERTY",
            NotificationType::PropertyUpdated => "PROPERTY_UPDATED",
            NotificationType::PriceDrop => "PRICE_DROP",
            NotificationType::AppointmentCreated => "APPOINTMENT_CREATED",
            NotificationType::AppointmentConfirmed => "APPOINTMENT_CONFIRMED",
            NotificationType::AppointmentCancelled => "APPOINTMENT_CANCELLED",
            NotificationType::BookingCreated => "BOOKING_CREATED",
            NotificationType::BookingConfirmed => "BOOKING_CONFIRMED",
            NotificationType::PaymentReceived => "PAYMENT_RECEIVED",
            NotificationType::Welcome => "WELCOME",
            NotificationType::SystemNotification => "SYSTEM_NOTIFICATION",
        }
    }
}

impl Display for NotificationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| anyhow::anyhow!("Unknown notification type '{}'", s))
    }
}
