use chrono::NaiveDate;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use shared_config::AppConfig;

/// Recipient and slot data for a booking or reschedule email.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    pub to: String,
    pub patient_name: String,
    pub doctor_name: String,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
}

/// Best-effort email sender.
///
/// Sends run on a detached task after the booking transaction has committed:
/// a failed send is logged and never rolls back or surfaces as a booking
/// failure.
#[derive(Clone)]
pub struct NotificationService {
    client: Client,
    webhook_url: String,
}

impl NotificationService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            webhook_url: config.notification_webhook_url.clone(),
        }
    }

    pub fn notify_booked(&self, payload: NotificationPayload) {
        self.dispatch("appointment_booked", payload);
    }

    pub fn notify_rescheduled(&self, payload: NotificationPayload) {
        self.dispatch("appointment_rescheduled", payload);
    }

    fn dispatch(&self, event: &'static str, payload: NotificationPayload) {
        if self.webhook_url.is_empty() {
            debug!("Notification webhook not configured, skipping {} email", event);
            return;
        }

        let client = self.client.clone();
        let url = self.webhook_url.clone();

        tokio::spawn(async move {
            let body = json!({
                "event": event,
                "to": payload.to,
                "patient_name": payload.patient_name,
                "doctor_name": payload.doctor_name,
                "date": payload.date,
                "start_time": payload.start_time,
                "end_time": payload.end_time,
            });

            match client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Sent {} notification to {}", event, payload.to);
                }
                Ok(response) => {
                    warn!(
                        "Notification endpoint returned {} for {} email to {}",
                        response.status(),
                        event,
                        payload.to
                    );
                }
                Err(e) => {
                    warn!("Failed to send {} notification: {}", event, e);
                }
            }
        });
    }
}
