//! Booking lifecycle endpoints.
//!
//! Creation runs through the availability validator; checkout hands off to
//! the external processor; cancellation is synchronous before payment and an
//! asynchronous refund after it. Financial state only ever changes through
//! the payment event pipeline.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{Booking, BookingStatus, CreateBooking};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/checkout", post(checkout))
        .route("/bookings/{id}/cancel", post(cancel_booking))
        .route("/bookings/{id}/complete", post(complete_booking))
        .route("/bookings/{id}/dispute", post(dispute_booking))
        .route("/bookings/{id}/resolve", post(resolve_booking))
}

/// Create a booking, atomically reserving the slot.
///
/// The listing's price and terms are frozen onto the booking, as is the
/// customer's bound referrer - later listing edits or attribution changes
/// never touch an existing booking.
pub async fn create_booking(
    State(state): State<AppState>,
    Json(input): Json<CreateBooking>,
) -> Result<(StatusCode, Json<Booking>)> {
    if input.starts_at >= input.ends_at {
        return Err(AppError::Validation(
            "booking interval must satisfy starts_at < ends_at".into(),
        ));
    }

    let conn = state.db.get()?;

    let listing = queries::get_listing_by_id(&conn, &input.listing_id)?
        .ok_or_else(|| AppError::NotFound(format!("listing {}", input.listing_id)))?;

    if queries::get_profile_by_id(&conn, &input.customer_id)?.is_none() {
        return Err(AppError::NotFound(format!("profile {}", input.customer_id)));
    }

    let referrer_id = queries::get_attribution(&conn, &input.customer_id)?
        .map(|a| a.referrer_id);

    let booking = queries::try_reserve_slot(
        &conn,
        &input,
        &listing,
        referrer_id.as_deref(),
        state.reservation_ttl_secs,
    )?
    .ok_or_else(|| {
        AppError::SlotUnavailable(format!(
            "provider {} already has a booking overlapping [{}, {})",
            listing.provider_id, input.starts_at, input.ends_at
        ))
    })?;

    tracing::info!(
        "Booking created: id={}, provider={}, interval=[{}, {})",
        booking.id,
        booking.provider_id,
        booking.starts_at,
        booking.ends_at
    );

    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Booking>> {
    let conn = state.db.get()?;
    let booking = queries::get_booking_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {}", id)))?;
    Ok(Json(booking))
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub checkout_url: String,
}

/// Hand a pending booking off to the external payment processor.
///
/// Retrying after a timeout reuses the original reservation: an expired hold
/// is re-armed through the same overlap validation, so a retry can never
/// produce a second booking for the slot.
pub async fn checkout(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CheckoutResponse>> {
    let conn = state.db.get()?;

    let booking = queries::get_booking_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {}", id)))?;

    if booking.status != BookingStatus::Pending {
        return Err(AppError::Conflict(format!(
            "booking {} is {} - only pending bookings can check out",
            id, booking.status
        )));
    }

    let age = chrono::Utc::now().timestamp() - booking.created_at;
    if age > state.reservation_ttl_secs
        && !queries::refresh_pending_reservation(&conn, &id, state.reservation_ttl_secs)?
    {
        return Err(AppError::SlotUnavailable(format!(
            "reservation for booking {} lapsed and the slot was taken",
            id
        )));
    }
    drop(conn);

    // Bounded timeout inside the gateway; on timeout the booking stays
    // pending and the caller retries checkout.
    let (session_id, checkout_url) = state
        .gateway
        .create_checkout_session(&booking.id, booking.price_minor, &booking.currency)
        .await?;

    Ok(Json(CheckoutResponse {
        session_id,
        checkout_url,
    }))
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub status: &'static str,
}

/// Cancel a booking.
///
/// Pre-payment cancellation is synchronous and releases the slot. After
/// payment, this submits an asynchronous refund request; the booking and the
/// ledger settle when the refund event comes back through the processor.
pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>> {
    let conn = state.db.get()?;

    let booking = queries::get_booking_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {}", id)))?;

    match booking.status {
        BookingStatus::Pending => {
            queries::transition_booking(
                &conn,
                &id,
                &[BookingStatus::Pending],
                BookingStatus::Cancelled,
            )?;
            Ok(Json(CancelResponse { status: "cancelled" }))
        }
        BookingStatus::Confirmed => {
            let refunded = queries::refunded_total_for_booking(&conn, &id)?;
            let refundable = booking.price_minor - refunded;
            if refundable <= 0 {
                return Err(AppError::Conflict(format!(
                    "booking {} has no refundable balance",
                    id
                )));
            }
            drop(conn);
            state.gateway.request_refund(&id, refundable).await?;
            Ok(Json(CancelResponse {
                status: "refund_requested",
            }))
        }
        other => Err(AppError::Conflict(format!(
            "booking {} is {} - cannot cancel",
            id, other
        ))),
    }
}

pub async fn complete_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>> {
    transition(&state, &id, &[BookingStatus::Confirmed], BookingStatus::Completed)?;
    Ok(Json(CancelResponse { status: "completed" }))
}

pub async fn dispute_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>> {
    transition(&state, &id, &[BookingStatus::Confirmed], BookingStatus::Disputed)?;
    Ok(Json(CancelResponse { status: "disputed" }))
}

/// Settle a dispute in the provider's favour. The refund path settles the
/// other way through the payment event pipeline.
pub async fn resolve_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>> {
    transition(&state, &id, &[BookingStatus::Disputed], BookingStatus::Resolved)?;
    Ok(Json(CancelResponse { status: "resolved" }))
}

fn transition(
    state: &AppState,
    id: &str,
    from: &[BookingStatus],
    to: BookingStatus,
) -> Result<()> {
    let conn = state.db.get()?;
    let booking = queries::get_booking_by_id(&conn, id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {}", id)))?;
    if !queries::transition_booking(&conn, id, from, to)? {
        return Err(AppError::Conflict(format!(
            "booking {} is {} - cannot move to {}",
            id, booking.status, to
        )));
    }
    Ok(())
}
