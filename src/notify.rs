//! Outbound notification events.
//!
//! When configured via `NOTIFY_WEBHOOK_URL`, the engine emits
//! `booking.confirmed`, `commission.earned`, `payout.completed`, and
//! `payout.failed` events after the corresponding transaction commits.
//! Delivery is best-effort and never blocks or fails the originating
//! operation; the notification collaborator owns content and fan-out.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use reqwest::Client;
use serde::Serialize;

/// Retry delays in milliseconds for notification webhooks.
/// Quick retries (100ms, 200ms) to avoid long-lived background tasks.
const NOTIFY_RETRY_DELAYS: &[u64] = &[100, 200];

/// Notification event payload (owned for async spawning).
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    /// Event type: "booking.confirmed", "commission.earned",
    /// "payout.completed", "payout.failed"
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_minor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Unix timestamp
    pub timestamp: i64,
}

impl NotificationEvent {
    pub fn new(event: &str) -> Self {
        Self {
            event: event.to_string(),
            booking_id: None,
            payout_id: None,
            party_id: None,
            amount_minor: None,
            currency: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn booking(mut self, booking_id: &str) -> Self {
        self.booking_id = Some(booking_id.to_string());
        self
    }

    pub fn payout(mut self, payout_id: &str) -> Self {
        self.payout_id = Some(payout_id.to_string());
        self
    }

    pub fn party(mut self, party_id: &str) -> Self {
        self.party_id = Some(party_id.to_string());
        self
    }

    pub fn amount(mut self, amount_minor: i64) -> Self {
        self.amount_minor = Some(amount_minor);
        self
    }

    pub fn currency(mut self, currency: &str) -> Self {
        self.currency = Some(currency.to_string());
        self
    }
}

/// Spawn a fire-and-forget notification.
///
/// If no webhook URL is configured, this is a no-op. The event is sent in a
/// background task; failures are logged and never affect the caller. Panics
/// in the spawned task are logged rather than silently swallowed.
pub fn spawn_notification(client: Client, url: Option<String>, event: NotificationEvent) {
    if let Some(url) = url {
        let event_type = event.event.clone();
        tokio::spawn(
            AssertUnwindSafe(async move {
                send_notification(&client, &url, &event).await;
            })
            .catch_unwind()
            .map(move |result| {
                if let Err(panic) = result {
                    let panic_msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(
                        "Notification task panicked for event '{}': {}",
                        event_type,
                        panic_msg
                    );
                }
            }),
        );
    }
}

async fn send_notification(client: &Client, url: &str, event: &NotificationEvent) {
    for (attempt, delay_ms) in std::iter::once(&0u64)
        .chain(NOTIFY_RETRY_DELAYS.iter())
        .enumerate()
    {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
        }

        match client
            .post(url)
            .json(event)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                if attempt > 0 {
                    tracing::debug!("Notification webhook succeeded after {} retries", attempt);
                }
                return;
            }
            Ok(resp) => {
                tracing::warn!(
                    "Notification webhook for '{}' returned {}",
                    event.event,
                    resp.status()
                );
            }
            Err(e) => {
                tracing::warn!("Notification webhook for '{}' failed: {}", event.event, e);
            }
        }
    }

    tracing::warn!(
        "Notification '{}' dropped after {} attempts",
        event.event,
        NOTIFY_RETRY_DELAYS.len() + 1
    );
}
