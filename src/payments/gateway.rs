//! Outbound client for the external payment processor.
//!
//! Every call carries a bounded timeout: a hung checkout handoff leaves the
//! booking `Pending` and the caller retries with a fresh attempt. Refund and
//! payout submissions are requests only - the authoritative outcome always
//! arrives later as a signed webhook event.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, Result};

/// Checkout handoff timeout. Kept short so a slow processor surfaces as a
/// retryable timeout instead of a stuck request worker.
const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for refund/payout submissions.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct CreateCheckoutResponse {
    id: String,
    url: String,
}

#[derive(Debug, Clone)]
pub struct PaymentGateway {
    client: Client,
    api_url: String,
}

impl PaymentGateway {
    pub fn new(api_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a checkout session for a pending booking.
    ///
    /// Returns the processor's session ID and the redirect URL the customer
    /// completes payment at.
    pub async fn create_checkout_session(
        &self,
        booking_id: &str,
        amount_minor: i64,
        currency: &str,
    ) -> Result<(String, String)> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_url))
            .timeout(CHECKOUT_TIMEOUT)
            .form(&[
                ("amount", amount_minor.to_string()),
                ("currency", currency.to_string()),
                ("metadata[booking_id]", booking_id.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Processor API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Processor API error: {}",
                error_text
            )));
        }

        let session: CreateCheckoutResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse processor response: {}", e)))?;

        Ok((session.id, session.url))
    }

    /// Request an asynchronous refund for a captured booking payment.
    ///
    /// The ledger is untouched here; the refund lands later as a
    /// `payment.refunded` event through the processor pipeline.
    pub async fn request_refund(&self, booking_id: &str, amount_minor: i64) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/v1/refunds", self.api_url))
            .timeout(SUBMIT_TIMEOUT)
            .form(&[
                ("amount", amount_minor.to_string()),
                ("metadata[booking_id]", booking_id.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Processor API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Refund request failed: {}",
                error_text
            )));
        }
        Ok(())
    }

    /// Submit a payout request for reserved ledger funds.
    ///
    /// Reconciled later by `payout.completed` / `payout.failed` events.
    pub async fn submit_payout(
        &self,
        payout_id: &str,
        party_id: &str,
        amount_minor: i64,
    ) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/v1/payouts", self.api_url))
            .timeout(SUBMIT_TIMEOUT)
            .form(&[
                ("amount", amount_minor.to_string()),
                ("destination", party_id.to_string()),
                ("metadata[payout_id]", payout_id.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Processor API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Payout submission failed: {}",
                error_text
            )));
        }
        Ok(())
    }
}
