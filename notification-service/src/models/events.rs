//! Appointment and booking lifecycle events published by the scheduling services.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentEvent {
    pub event_type: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub appointment_id: Option<String>,
    #[serde(default)]
    pub appointment_date_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub previous_date_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,

    #[serde(default)]
    pub requester_name: Option<String>,
    #[serde(default)]
    pub requester_email: Option<String>,

    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub provider_email: Option<String>,
    #[serde(default)]
    pub provider_phone: Option<String>,

    #[serde(default)]
    pub property_id: Option<i64>,
    #[serde(default)]
    pub property_title: Option<String>,
    #[serde(default)]
    pub property_address: Option<String>,

    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingEvent {
    pub event_type: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub booking_id: Option<String>,
    #[serde(default)]
    pub move_in_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub move_out_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub booking_duration_months: Option<u32>,

    #[serde(default)]
    pub property_id: Option<i64>,
    #[serde(default)]
    pub property_title: Option<String>,
    #[serde(default)]
    pub property_address: Option<String>,

    #[serde(default)]
    pub requester_name: Option<String>,
    #[serde(default)]
    pub requester_email: Option<String>,

    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub provider_email: Option<String>,

    #[serde(default)]
    pub monthly_rent: Option<f64>,
    #[serde(default)]
    pub deposit_amount: Option<f64>,
    #[serde(default)]
    pub total_amount: Option<f64>,
    #[serde(default)]
    pub payment_deadline: Option<NaiveDateTime>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,

    #[serde(default)]
    pub cancellation_reason: Option<String>,
}
