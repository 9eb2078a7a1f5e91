use std::sync::Arc;

use anyhow::{Error, Result};
use chrono::NaiveDateTime;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    clients::rbmq::{QueueWorker, RabbitMqClient},
    dispatch::{EmailDispatcher, EmailJob},
    error::DispatchError,
    models::events::{AppointmentEvent, BookingEvent},
};

const SIGNATURE: &str = "Best regards,\nStudent Housing Team";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Appointment,
    Booking,
}

/// Turns appointment and booking lifecycle events into emails on the dispatcher.
pub struct SagaEventHandler {
    dispatcher: Arc<EmailDispatcher>,
    frontend_base_url: String,
}

impl SagaEventHandler {
    pub fn new(dispatcher: Arc<EmailDispatcher>, frontend_base_url: &str) -> Self {
        Self {
            dispatcher,
            frontend_base_url: frontend_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Returns true when an email was queued.
    pub fn handle_appointment(&self, event: &AppointmentEvent) -> Result<bool, DispatchError> {
        info!(
            event_type = %event.event_type,
            appointment_id = ?event.appointment_id,
            "Received appointment event"
        );

        match appointment_email(event, &self.frontend_base_url) {
            Some(job) => self.dispatcher.submit(job).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn handle_booking(&self, event: &BookingEvent) -> Result<bool, DispatchError> {
        info!(
            event_type = %event.event_type,
            booking_id = ?event.booking_id,
            "Received booking event"
        );

        match booking_email(event) {
            Some(job) => self.dispatcher.submit(job).map(|_| true),
            None => Ok(false),
        }
    }

    /// Decodes and handles one raw event. Returns false for undecodable payloads.
    pub fn handle_payload(&self, kind: EventKind, payload: &[u8]) -> bool {
        let handled = match kind {
            EventKind::Appointment => {
                decode::<AppointmentEvent>(payload).map(|event| self.handle_appointment(&event))
            }
            EventKind::Booking => {
                decode::<BookingEvent>(payload).map(|event| self.handle_booking(&event))
            }
        };

        match handled {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                error!(error = %e, "Failed to queue event email");
                true
            }
            Err(e) => {
                error!(error = %e, "Undecodable saga event");
                false
            }
        }
    }

    pub async fn spawn_workers(
        self: Arc<Self>,
        broker: &RabbitMqClient,
        queues: &[(EventKind, String)],
        prefetch_count: u16,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>, Error> {
        let mut handles = Vec::with_capacity(queues.len());

        for (kind, queue) in queues {
            let tag = format!("{}-saga-worker", queue);
            let worker = broker.create_consumer(queue, &tag, prefetch_count).await?;

            handles.push(tokio::spawn(run_worker(
                Arc::clone(&self),
                *kind,
                worker,
                shutdown.clone(),
            )));

            info!(queue = %queue, "Saga event consumer started");
        }

        Ok(handles)
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(payload)
}

async fn run_worker(
    handler: Arc<SagaEventHandler>,
    kind: EventKind,
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
                error!(error = %e, "Saga consumer stream error");
                continue;
            }
            None => break,
        };

        let settled = if handler.handle_payload(kind, &delivery.data) {
            worker.acknowledge(delivery.delivery_tag).await
        } else {
            worker.reject(delivery.delivery_tag, false).await
        };

        if let Err(e) = settled {
            warn!(error = %e, "Failed to settle saga delivery");
        }
    }
}

fn text(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("N/A")
}

fn date(value: &Option<NaiveDateTime>) -> String {
    value
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn recipient(email: &Option<String>) -> Option<&str> {
    email.as_deref().filter(|e| !e.trim().is_empty())
}

pub fn appointment_email(event: &AppointmentEvent, frontend_base_url: &str) -> Option<EmailJob> {
    let Some(to) = recipient(&event.requester_email) else {
        warn!(event_type = %event.event_type, "Appointment event without requester email");
        return None;
    };

    let name = text(&event.requester_name);
    let property = text(&event.property_title);
    let appointment_url = format!(
        "{}/appointments/{}",
        frontend_base_url,
        text(&event.appointment_id)
    );

    let (subject, body) = match event.event_type.as_str() {
        "APPOINTMENT_CREATED" => (
            format!("Appointment Created - {}", property),
            format!(
                "Dear {},\n\nYour appointment request for {} has been created.\n\n\
                 Date: {}\nDuration: {} minutes\nAddress: {}\nProvider: {} ({})\n\n\
                 View appointment details: {}\n\n{}",
                name,
                property,
                date(&event.appointment_date_time),
                event.duration_minutes.unwrap_or_default(),
                text(&event.property_address),
                text(&event.provider_name),
                text(&event.provider_email),
                appointment_url,
                SIGNATURE
            ),
        ),
        "APPOINTMENT_CONFIRMED" => (
            format!("Appointment Confirmed - {}", property),
            format!(
                "Dear {},\n\nYour appointment for {} has been confirmed.\n\n\
                 Date: {}\nAddress: {}\nContact: {} ({}, {})\n\n\
                 View appointment details: {}\n\n{}",
                name,
                property,
                date(&event.appointment_date_time),
                text(&event.property_address),
                text(&event.provider_name),
                text(&event.provider_email),
                text(&event.provider_phone),
                appointment_url,
                SIGNATURE
            ),
        ),
        "APPOINTMENT_CANCELLED" => (
            format!("Appointment Cancelled - {}", property),
            format!(
                "Dear {},\n\nYour appointment for {} has been cancelled.\n\nReason: {}\n\n\
                 If you would like to reschedule, please create a new appointment.\n\n{}",
                name,
                property,
                text(&event.cancellation_reason),
                SIGNATURE
            ),
        ),
        "APPOINTMENT_RESCHEDULED" => (
            format!("Appointment Rescheduled - {}", property),
            format!(
                "Dear {},\n\nYour appointment for {} has been rescheduled.\n\n\
                 Previous Date: {}\nNew Date: {}\n\nView appointment details: {}\n\n{}",
                name,
                property,
                date(&event.previous_date_time),
                date(&event.appointment_date_time),
                appointment_url,
                SIGNATURE
            ),
        ),
        other => {
            debug!(event_type = other, "Appointment event type not handled");
            return None;
        }
    };

    Some(EmailJob::plain(to, subject, body))
}

pub fn booking_email(event: &BookingEvent) -> Option<EmailJob> {
    let Some(to) = recipient(&event.requester_email) else {
        warn!(event_type = %event.event_type, "Booking event without requester email");
        return None;
    };

    let name = text(&event.requester_name);
    let property = text(&event.property_title);
    let booking_id = text(&event.booking_id);

    let (subject, body) = match event.event_type.as_str() {
        "BOOKING_CREATED" => (
            format!("Booking Created - {}", property),
            format!(
                "Dear {},\n\nYour booking for {} has been created.\n\n\
                 Booking ID: {}\nMove-In Date: {}\nMove-Out Date: {}\n\
                 Monthly Rent: €{:.2}\nDeposit: €{:.2}\nTotal: €{:.2}\n\
                 Payment Deadline: {}\n\n{}",
                name,
                property,
                booking_id,
                date(&event.move_in_date),
                date(&event.move_out_date),
                event.monthly_rent.unwrap_or_default(),
                event.deposit_amount.unwrap_or_default(),
                event.total_amount.unwrap_or_default(),
                date(&event.payment_deadline),
                SIGNATURE
            ),
        ),
        "BOOKING_CONFIRMED" => (
            format!("Booking Confirmed - {}", property),
            format!(
                "Dear {},\n\nCongratulations! Your booking has been confirmed.\n\n\
                 Booking ID: {}\nProperty: {}\nMove-In Date: {}\n\n\
                 We'll send you the rental agreement soon.\n\n{}",
                name,
                booking_id,
                property,
                date(&event.move_in_date),
                SIGNATURE
            ),
        ),
        "BOOKING_PAYMENT_COMPLETED" => (
            format!("Payment Confirmed - {}", property),
            format!(
                "Dear {},\n\nWe received your payment.\n\n\
                 Booking ID: {}\nTransaction ID: {}\nPayment Method: {}\nAmount: €{:.2}\n\
                 Move-In Date: {}\n\n{}",
                name,
                booking_id,
                text(&event.transaction_id),
                event.payment_method.as_deref().unwrap_or("Credit Card"),
                event.total_amount.unwrap_or_default(),
                date(&event.move_in_date),
                SIGNATURE
            ),
        ),
        "BOOKING_CANCELLED" => (
            format!("Booking Cancelled - {}", property),
            format!(
                "Dear {},\n\nYour booking has been cancelled.\n\n\
                 Booking ID: {}\nProperty: {}\nReason: {}\n\n\
                 If payment was made, a refund will be processed within 5-7 business days.\n\n{}",
                name,
                booking_id,
                property,
                text(&event.cancellation_reason),
                SIGNATURE
            ),
        ),
        "BOOKING_EXPIRED" => (
            format!("Booking Expired - {}", property),
            format!(
                "Dear {},\n\nYour booking has expired due to non-payment.\n\n\
                 Booking ID: {}\nProperty: {}\n\n\
                 If you're still interested in this property, please create a new booking.\n\n{}",
                name, booking_id, property, SIGNATURE
            ),
        ),
        other => {
            debug!(event_type = other, "Booking event type not handled");
            return None;
        }
    };

    Some(EmailJob::plain(to, subject, body))
}
