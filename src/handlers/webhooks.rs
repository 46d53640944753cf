//! Payment processor webhook endpoint.
//!
//! The caller here is the processor, not the end user: payment completion is
//! observed by polling booking status, never from this response. Every
//! delivery is acknowledged unless its signature fails - acknowledged events
//! must not be retried by the source, and that includes dead-lettered
//! failures, which are replayed from our side instead.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::payments::{process_event, Ack};

/// Signature header set by the payment processor.
const SIGNATURE_HEADER: &str = "processor-signature";

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/payments", post(handle_payment_webhook))
}

pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str)> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;

    let ack = process_event(&state, &body, signature)?;

    Ok(match ack {
        Ack::Processed => (StatusCode::OK, "OK"),
        Ack::IdempotentReplay => (StatusCode::OK, "Already processed"),
        Ack::Ignored => (StatusCode::OK, "Event ignored"),
        Ack::DeadLettered => (StatusCode::OK, "Accepted"),
    })
}
