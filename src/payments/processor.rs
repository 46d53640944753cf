//! Idempotent payment event processing.
//!
//! The contract with the payment processor: a delivery is either rejected
//! synchronously for a bad signature (no side effects, safe to retry with a
//! corrected signature), or it is acknowledged - first-time processing,
//! idempotent replay, and dead-lettered failures all acknowledge, because
//! anything else invites a redelivery storm while the dead-letter store
//! preserves recoverability.
//!
//! For every event, the idempotency check, the booking state transition, and
//! the ledger writes share one database transaction: readers never observe a
//! confirmed booking without its commission entries or vice versa.

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{
    BookingStatus, CreateLedgerEntry, DeadLetterSeverity, EventEnvelope, LedgerRole, LedgerStatus,
    PaymentEventKind, PayoutStatus,
};
use crate::notify::{spawn_notification, NotificationEvent};
use crate::split::{compute_refund_split, compute_split, Share, SplitError};

use super::signature::verify_signature;

/// Synthetic ledger party for the platform's own commission share.
pub const PLATFORM_PARTY_ID: &str = "platform";

/// Acknowledgement returned to the webhook endpoint. Every variant maps to a
/// success response; only `InvalidSignature` (an error) is rejected.
#[derive(Debug, PartialEq, Eq)]
pub enum Ack {
    /// First-time processing, effects committed.
    Processed,
    /// Event seen before; zero new writes.
    IdempotentReplay,
    /// Event type not relevant to this engine.
    Ignored,
    /// Processing failed after the signature check; payload captured for replay.
    DeadLettered,
}

/// Internal processing failure, destined for the dead-letter store.
struct ProcessingFailure {
    error: String,
    severity: DeadLetterSeverity,
}

impl ProcessingFailure {
    fn transient(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            severity: DeadLetterSeverity::Transient,
        }
    }

    fn fatal(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            severity: DeadLetterSeverity::Fatal,
        }
    }
}

impl From<AppError> for ProcessingFailure {
    fn from(e: AppError) -> Self {
        Self::transient(e.to_string())
    }
}

/// Outcome of applying an event inside its transaction.
enum Applied {
    Replay,
    Done(Vec<NotificationEvent>),
}

/// Process a raw payment processor delivery.
///
/// The only error this returns is `InvalidSignature`, raised before any side
/// effect. Everything downstream resolves to an `Ack`.
pub fn process_event(state: &AppState, raw: &[u8], signature_header: &str) -> Result<Ack> {
    match verify_signature(&state.webhook_secret, raw, signature_header) {
        Ok(true) => {}
        Ok(false) | Err(_) => return Err(AppError::InvalidSignature),
    }

    let mut conn = state.db.get()?;

    let envelope: EventEnvelope = match serde_json::from_slice(raw) {
        Ok(e) => e,
        Err(e) => {
            // A malformed payload will never parse on redelivery either;
            // capture it and acknowledge.
            dead_letter(&conn, None, raw, &format!("unparseable payload: {}", e),
                DeadLetterSeverity::Transient);
            return Ok(Ack::DeadLettered);
        }
    };

    let kind = match parse_kind(&envelope) {
        Ok(k) => k,
        Err(e) => {
            dead_letter(&conn, Some(&envelope.event_id), raw, &e, DeadLetterSeverity::Transient);
            return Ok(Ack::DeadLettered);
        }
    };

    if matches!(kind, PaymentEventKind::Ignored) {
        return Ok(Ack::Ignored);
    }

    match apply_event(&mut conn, state, &envelope.event_id, &kind) {
        Ok(Applied::Replay) => {
            tracing::info!("Idempotent replay of event {}", envelope.event_id);
            Ok(Ack::IdempotentReplay)
        }
        Ok(Applied::Done(notifications)) => {
            for event in notifications {
                spawn_notification(
                    state.http_client.clone(),
                    state.notify_webhook_url.clone(),
                    event,
                );
            }
            Ok(Ack::Processed)
        }
        Err(failure) => {
            tracing::warn!(
                "Event {} dead-lettered ({}): {}",
                envelope.event_id,
                failure.severity,
                failure.error
            );
            dead_letter(&conn, Some(&envelope.event_id), raw, &failure.error, failure.severity);
            Ok(Ack::DeadLettered)
        }
    }
}

/// Replay a dead-lettered event by ID.
///
/// The payload was captured after signature verification, so replay goes
/// straight to parsing and the (still idempotent) transactional apply.
pub fn replay_dead_letter(state: &AppState, dead_letter_id: &str) -> Result<Ack> {
    let mut conn = state.db.get()?;

    let dl = queries::get_dead_letter_by_id(&conn, dead_letter_id)?
        .ok_or_else(|| AppError::NotFound(format!("dead letter {}", dead_letter_id)))?;

    if dl.replayed_at.is_some() {
        return Ok(Ack::IdempotentReplay);
    }

    let envelope: EventEnvelope = match serde_json::from_slice(dl.payload.as_bytes()) {
        Ok(e) => e,
        Err(e) => {
            queries::bump_dead_letter_attempt(&conn, &dl.id, &format!("unparseable payload: {}", e))?;
            return Err(AppError::Validation("dead letter payload is unparseable".into()));
        }
    };

    let kind = match parse_kind(&envelope) {
        Ok(k) => k,
        Err(e) => {
            queries::bump_dead_letter_attempt(&conn, &dl.id, &e)?;
            return Err(AppError::Validation(e));
        }
    };

    if matches!(kind, PaymentEventKind::Ignored) {
        queries::mark_dead_letter_replayed(&conn, &dl.id)?;
        return Ok(Ack::Ignored);
    }

    match apply_event(&mut conn, state, &envelope.event_id, &kind) {
        Ok(Applied::Replay) => {
            queries::mark_dead_letter_replayed(&conn, &dl.id)?;
            Ok(Ack::IdempotentReplay)
        }
        Ok(Applied::Done(notifications)) => {
            queries::mark_dead_letter_replayed(&conn, &dl.id)?;
            for event in notifications {
                spawn_notification(
                    state.http_client.clone(),
                    state.notify_webhook_url.clone(),
                    event,
                );
            }
            tracing::info!("Dead letter {} replayed successfully", dl.id);
            Ok(Ack::Processed)
        }
        Err(failure) => {
            queries::bump_dead_letter_attempt(&conn, &dl.id, &failure.error)?;
            Ok(Ack::DeadLettered)
        }
    }
}

fn dead_letter(
    conn: &Connection,
    external_event_id: Option<&str>,
    raw: &[u8],
    error: &str,
    severity: DeadLetterSeverity,
) {
    let payload = String::from_utf8_lossy(raw);
    if let Err(e) = queries::create_dead_letter(conn, external_event_id, &payload, error, severity) {
        // Nothing left to do but log; the source gets acknowledged regardless.
        tracing::error!("Failed to write dead letter for {:?}: {}", external_event_id, e);
    }
}

// ============ Event Parsing ============

#[derive(Deserialize)]
struct PaymentData {
    booking_id: String,
    amount_minor: i64,
    currency: String,
}

#[derive(Deserialize)]
struct PayoutData {
    payout_id: String,
    reason: Option<String>,
}

fn parse_kind(envelope: &EventEnvelope) -> std::result::Result<PaymentEventKind, String> {
    match envelope.event_type.as_str() {
        "payment.succeeded" => {
            let data: PaymentData = serde_json::from_value(envelope.data.clone())
                .map_err(|e| format!("invalid payment.succeeded data: {}", e))?;
            Ok(PaymentEventKind::PaymentSucceeded {
                booking_id: data.booking_id,
                amount_minor: data.amount_minor,
                currency: data.currency,
            })
        }
        "payment.refunded" => {
            let data: PaymentData = serde_json::from_value(envelope.data.clone())
                .map_err(|e| format!("invalid payment.refunded data: {}", e))?;
            Ok(PaymentEventKind::PaymentRefunded {
                booking_id: data.booking_id,
                amount_minor: data.amount_minor,
                currency: data.currency,
            })
        }
        "payout.completed" => {
            let data: PayoutData = serde_json::from_value(envelope.data.clone())
                .map_err(|e| format!("invalid payout.completed data: {}", e))?;
            Ok(PaymentEventKind::PayoutCompleted {
                payout_id: data.payout_id,
            })
        }
        "payout.failed" => {
            let data: PayoutData = serde_json::from_value(envelope.data.clone())
                .map_err(|e| format!("invalid payout.failed data: {}", e))?;
            Ok(PaymentEventKind::PayoutFailed {
                payout_id: data.payout_id,
                reason: data.reason,
            })
        }
        _ => Ok(PaymentEventKind::Ignored),
    }
}

// ============ Transactional Apply ============

fn apply_event(
    conn: &mut Connection,
    state: &AppState,
    external_event_id: &str,
    kind: &PaymentEventKind,
) -> std::result::Result<Applied, ProcessingFailure> {
    match kind {
        PaymentEventKind::PaymentSucceeded {
            booking_id,
            amount_minor,
            currency,
        } => apply_payment_succeeded(conn, state, external_event_id, booking_id, *amount_minor, currency),
        PaymentEventKind::PaymentRefunded {
            booking_id,
            amount_minor,
            currency,
        } => apply_payment_refunded(conn, state, external_event_id, booking_id, *amount_minor, currency),
        PaymentEventKind::PayoutCompleted { payout_id } => {
            apply_payout_completed(conn, external_event_id, payout_id)
        }
        PaymentEventKind::PayoutFailed { payout_id, reason } => {
            apply_payout_failed(conn, external_event_id, payout_id, reason.as_deref())
        }
        PaymentEventKind::Ignored => Ok(Applied::Done(Vec::new())),
    }
}

fn apply_payment_succeeded(
    conn: &mut Connection,
    state: &AppState,
    external_event_id: &str,
    booking_id: &str,
    amount_minor: i64,
    currency: &str,
) -> std::result::Result<Applied, ProcessingFailure> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| ProcessingFailure::transient(format!("failed to start transaction: {}", e)))?;

    // Idempotency check, inside the same transaction as the effects.
    let Some(event_id) = queries::try_record_payment_event(
        &tx,
        external_event_id,
        "payment.succeeded",
        Some(booking_id),
        None,
        amount_minor,
    )?
    else {
        return Ok(Applied::Replay);
    };

    let booking = queries::get_booking_by_id(&tx, booking_id)?
        .ok_or_else(|| ProcessingFailure::transient(format!("unknown booking {}", booking_id)))?;

    if booking.price_minor != amount_minor || booking.currency != currency {
        return Err(ProcessingFailure::fatal(format!(
            "captured amount {} {} does not match booking snapshot {} {}",
            amount_minor, currency, booking.price_minor, booking.currency
        )));
    }

    if !queries::transition_booking(&tx, booking_id, &[BookingStatus::Pending], BookingStatus::Confirmed)? {
        // Money was captured for a booking that is not awaiting payment -
        // needs a human, not a retry.
        return Err(ProcessingFailure::fatal(format!(
            "booking {} is {} - cannot confirm",
            booking_id, booking.status
        )));
    }

    // The custom override rate lives on the customer's attribution record.
    let referrer_rate = match booking.referrer_id.as_deref() {
        None => None,
        Some(_) => Some(
            queries::get_attribution(&tx, &booking.customer_id)?.and_then(|a| a.custom_rate_bp),
        ),
    };

    let shares = compute_split(amount_minor, referrer_rate, &state.rates)
        .map_err(|e| ProcessingFailure::fatal(format!("split calculation failed: {}", e)))?;

    let total: i64 = shares.iter().map(|s| s.amount_minor).sum();
    if total != amount_minor {
        return Err(ProcessingFailure::fatal(format!(
            "ledger invariant violation: split sums to {} for gross {}",
            total, amount_minor
        )));
    }

    let available_at = Utc::now().timestamp() + state.clearing_period_secs;
    for share in &shares {
        let party_id = match party_for_role(share.role, &booking.provider_id, booking.referrer_id.as_deref()) {
            Some(p) => p,
            None => {
                return Err(ProcessingFailure::fatal(
                    "referrer share without a referrer on the booking".to_string(),
                ))
            }
        };
        queries::create_ledger_entry(
            &tx,
            &CreateLedgerEntry {
                payment_event_id: event_id.clone(),
                booking_id: booking.id.clone(),
                party_id,
                role: share.role,
                amount_minor: share.amount_minor,
                status: LedgerStatus::PendingClearing,
                available_at,
                payout_id: None,
            },
        )?;
    }

    tx.commit()
        .map_err(|e| ProcessingFailure::transient(format!("commit failed: {}", e)))?;

    tracing::info!(
        "Payment captured: booking={}, gross={} {}, referrer={:?}",
        booking.id,
        amount_minor,
        currency,
        booking.referrer_id
    );

    let mut notifications = vec![NotificationEvent::new("booking.confirmed")
        .booking(&booking.id)
        .amount(amount_minor)
        .currency(currency)];
    for share in &shares {
        if share.role == LedgerRole::Platform {
            continue;
        }
        if let Some(party_id) =
            party_for_role(share.role, &booking.provider_id, booking.referrer_id.as_deref())
        {
            notifications.push(
                NotificationEvent::new("commission.earned")
                    .booking(&booking.id)
                    .party(&party_id)
                    .amount(share.amount_minor)
                    .currency(currency),
            );
        }
    }

    Ok(Applied::Done(notifications))
}

fn apply_payment_refunded(
    conn: &mut Connection,
    _state: &AppState,
    external_event_id: &str,
    booking_id: &str,
    amount_minor: i64,
    currency: &str,
) -> std::result::Result<Applied, ProcessingFailure> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| ProcessingFailure::transient(format!("failed to start transaction: {}", e)))?;

    let Some(event_id) = queries::try_record_payment_event(
        &tx,
        external_event_id,
        "payment.refunded",
        Some(booking_id),
        None,
        -amount_minor,
    )?
    else {
        return Ok(Applied::Replay);
    };

    // A refund is only meaningful once the original payment has committed;
    // until then it is queued through the dead-letter store. The transaction
    // rolls back on drop, so the event record above does not stick.
    let original = queries::get_payment_for_booking(&tx, booking_id)?.ok_or_else(|| {
        ProcessingFailure::transient(format!(
            "refund for booking {} arrived before its payment event",
            booking_id
        ))
    })?;

    let booking = queries::get_booking_by_id(&tx, booking_id)?
        .ok_or_else(|| ProcessingFailure::transient(format!("unknown booking {}", booking_id)))?;

    if booking.currency != currency {
        return Err(ProcessingFailure::fatal(format!(
            "refund currency {} does not match booking currency {}",
            currency, booking.currency
        )));
    }

    // refunded_total includes the event recorded above.
    let prior_refunded = queries::refunded_total_for_booking(&tx, booking_id)? - amount_minor;
    let refundable = original.gross_minor - prior_refunded;

    // Reconstruct the per-role split from the original event's non-reversed
    // entries (reservation splits net out exactly).
    let original_entries = queries::ledger_entries_for_event(&tx, &original.id)?;
    let mut role_totals: Vec<Share> = Vec::new();
    for entry in original_entries
        .iter()
        .filter(|e| e.status != LedgerStatus::Reversed)
    {
        match role_totals.iter_mut().find(|s| s.role == entry.role) {
            Some(share) => share.amount_minor += entry.amount_minor,
            None => role_totals.push(Share {
                role: entry.role,
                amount_minor: entry.amount_minor,
            }),
        }
    }

    let comps = compute_refund_split(&role_totals, original.gross_minor, amount_minor, refundable)
        .map_err(|e| match e {
            SplitError::RefundExceedsGross { .. } => ProcessingFailure::fatal(format!(
                "refund of {} exceeds refundable balance for booking {}: {}",
                amount_minor, booking_id, e
            )),
            other => ProcessingFailure::fatal(format!("refund split failed: {}", other)),
        })?;

    let now = Utc::now().timestamp();
    for comp in comps.iter().filter(|c| c.amount_minor != 0) {
        let party_id = match party_for_role(comp.role, &booking.provider_id, booking.referrer_id.as_deref()) {
            Some(p) => p,
            None => {
                return Err(ProcessingFailure::fatal(
                    "referrer compensation without a referrer on the booking".to_string(),
                ))
            }
        };

        // A compensation mirrors the stage its original share is in: shares
        // still clearing get a negative clearing entry on the same schedule,
        // cleared shares get an immediate negative available entry.
        let originals_for_role: Vec<_> = original_entries
            .iter()
            .filter(|e| e.role == comp.role && e.status != LedgerStatus::Reversed)
            .collect();
        let still_clearing = !originals_for_role.is_empty()
            && originals_for_role
                .iter()
                .all(|e| e.status == LedgerStatus::PendingClearing);
        let (status, available_at) = if still_clearing {
            (LedgerStatus::PendingClearing, originals_for_role[0].available_at)
        } else {
            (LedgerStatus::Available, now)
        };

        queries::create_ledger_entry(
            &tx,
            &CreateLedgerEntry {
                payment_event_id: event_id.clone(),
                booking_id: booking.id.clone(),
                party_id,
                role: comp.role,
                amount_minor: comp.amount_minor,
                status,
                available_at,
                payout_id: None,
            },
        )?;
    }

    // A fully refunded booking settles its terminal state; partial refunds
    // leave the booking where it is.
    if amount_minor == refundable {
        let settled = queries::transition_booking(
            &tx,
            booking_id,
            &[BookingStatus::Disputed],
            BookingStatus::Refunded,
        )? || queries::transition_booking(
            &tx,
            booking_id,
            &[BookingStatus::Confirmed],
            BookingStatus::Cancelled,
        )?;
        if !settled {
            tracing::warn!(
                "Fully refunded booking {} left in state {}",
                booking_id,
                booking.status
            );
        }
    }

    tx.commit()
        .map_err(|e| ProcessingFailure::transient(format!("commit failed: {}", e)))?;

    tracing::info!(
        "Refund processed: booking={}, amount={} {}, remaining_refundable={}",
        booking_id,
        amount_minor,
        currency,
        refundable - amount_minor
    );

    Ok(Applied::Done(Vec::new()))
}

fn apply_payout_completed(
    conn: &mut Connection,
    external_event_id: &str,
    payout_id: &str,
) -> std::result::Result<Applied, ProcessingFailure> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| ProcessingFailure::transient(format!("failed to start transaction: {}", e)))?;

    if queries::try_record_payment_event(
        &tx,
        external_event_id,
        "payout.completed",
        None,
        Some(payout_id),
        0,
    )?
    .is_none()
    {
        return Ok(Applied::Replay);
    }

    let payout = queries::get_payout_by_id(&tx, payout_id)?
        .ok_or_else(|| ProcessingFailure::transient(format!("unknown payout {}", payout_id)))?;

    if !queries::transition_payout(&tx, payout_id, PayoutStatus::Requested, PayoutStatus::PaidOut)? {
        return Err(ProcessingFailure::fatal(format!(
            "payout {} is {} - cannot complete",
            payout_id, payout.status
        )));
    }

    let reserved: i64 = queries::entries_for_payout(&tx, payout_id)?
        .iter()
        .filter(|e| e.status == LedgerStatus::Available)
        .map(|e| e.amount_minor)
        .sum();
    if reserved != payout.amount_minor {
        return Err(ProcessingFailure::fatal(format!(
            "ledger invariant violation: payout {} reserves {} but pays {}",
            payout_id, reserved, payout.amount_minor
        )));
    }

    queries::mark_payout_entries_paid(&tx, payout_id)?;

    tx.commit()
        .map_err(|e| ProcessingFailure::transient(format!("commit failed: {}", e)))?;

    tracing::info!(
        "Payout completed: payout={}, party={}, amount={}",
        payout.id,
        payout.party_id,
        payout.amount_minor
    );

    Ok(Applied::Done(vec![NotificationEvent::new("payout.completed")
        .payout(&payout.id)
        .party(&payout.party_id)
        .amount(payout.amount_minor)]))
}

fn apply_payout_failed(
    conn: &mut Connection,
    external_event_id: &str,
    payout_id: &str,
    reason: Option<&str>,
) -> std::result::Result<Applied, ProcessingFailure> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| ProcessingFailure::transient(format!("failed to start transaction: {}", e)))?;

    if queries::try_record_payment_event(
        &tx,
        external_event_id,
        "payout.failed",
        None,
        Some(payout_id),
        0,
    )?
    .is_none()
    {
        return Ok(Applied::Replay);
    }

    let payout = queries::get_payout_by_id(&tx, payout_id)?
        .ok_or_else(|| ProcessingFailure::transient(format!("unknown payout {}", payout_id)))?;

    if !queries::transition_payout(&tx, payout_id, PayoutStatus::Requested, PayoutStatus::Failed)? {
        return Err(ProcessingFailure::fatal(format!(
            "payout {} is {} - cannot fail",
            payout_id, payout.status
        )));
    }

    // Restore the funds: each reserved entry is reversed and compensated by
    // an equal available entry on the same payment event, so per-event sums
    // are preserved and history stays append-only.
    let reserved = queries::entries_for_payout(&tx, payout_id)?;
    for entry in reserved.iter().filter(|e| e.status == LedgerStatus::Available) {
        if !queries::reverse_entry(&tx, &entry.id)? {
            return Err(ProcessingFailure::fatal(format!(
                "reserved entry {} changed state during payout failure",
                entry.id
            )));
        }
        queries::create_ledger_entry(
            &tx,
            &CreateLedgerEntry {
                payment_event_id: entry.payment_event_id.clone(),
                booking_id: entry.booking_id.clone(),
                party_id: entry.party_id.clone(),
                role: entry.role,
                amount_minor: entry.amount_minor,
                status: LedgerStatus::Available,
                available_at: entry.available_at,
                payout_id: None,
            },
        )?;
    }

    tx.commit()
        .map_err(|e| ProcessingFailure::transient(format!("commit failed: {}", e)))?;

    tracing::info!(
        "Payout failed and funds restored: payout={}, party={}, amount={}, reason={:?}",
        payout.id,
        payout.party_id,
        payout.amount_minor,
        reason
    );

    Ok(Applied::Done(vec![NotificationEvent::new("payout.failed")
        .payout(&payout.id)
        .party(&payout.party_id)
        .amount(payout.amount_minor)]))
}

fn party_for_role(
    role: LedgerRole,
    provider_id: &str,
    referrer_id: Option<&str>,
) -> Option<String> {
    match role {
        LedgerRole::Recipient => Some(provider_id.to_string()),
        LedgerRole::Referrer => referrer_id.map(String::from),
        LedgerRole::Platform => Some(PLATFORM_PARTY_ID.to_string()),
    }
}
