//! Payment event processor tests: signatures, idempotency, ledger splits,
//! refunds, and dead-lettering

mod common;

use common::*;
use rusqlite::Connection;

fn setup_confirmed_booking(state: &AppState, with_referrer: bool) -> (Booking, Profile, Option<Profile>) {
    let conn = state.db.get().unwrap();

    let provider = create_test_profile(&conn, "Provider", "PROV1234");
    let listing = create_test_listing(&conn, &provider.id, 10_000);
    let customer = create_test_profile(&conn, "Customer", "CUST1234");

    let referrer = if with_referrer {
        let referrer = create_test_profile(&conn, "Referrer", "REFER123");
        queries::bind_attribution(&conn, &customer.id, &referrer.id, AttributionSource::Code, None)
            .unwrap();
        Some(referrer)
    } else {
        None
    };

    let start = now() + 3600;
    let booking = create_test_booking(&conn, &customer, &listing, start, start + 3600);
    drop(conn);

    confirm_booking_via_webhook(state, &booking, "evt_pay_1");
    let conn = state.db.get().unwrap();
    let booking = queries::get_booking_by_id(&conn, &booking.id).unwrap().unwrap();
    (booking, provider, referrer)
}

fn entry_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM ledger_entries", [], |r| r.get(0))
        .unwrap()
}

// ============ Signature Handling ============

#[test]
fn test_invalid_signature_rejected_with_no_side_effects() {
    let state = setup_test_state();
    let conn = state.db.get().unwrap();

    let provider = create_test_profile(&conn, "Provider", "PROV1234");
    let listing = create_test_listing(&conn, &provider.id, 10_000);
    let customer = create_test_profile(&conn, "Customer", "CUST1234");
    let start = now() + 3600;
    let booking = create_test_booking(&conn, &customer, &listing, start, start + 3600);

    let (body, _) = signed_event(
        "evt_bad_sig",
        "payment.succeeded",
        serde_json::json!({
            "booking_id": booking.id,
            "amount_minor": booking.price_minor,
            "currency": booking.currency,
        }),
    );
    let forged = sign_payload(&body, "wrong_secret");

    let result = process_event(&state, &body, &forged);
    assert!(result.is_err(), "Forged signature must be rejected");

    // No side effects: booking untouched, no events, no entries, no dead letters.
    let reloaded = queries::get_booking_by_id(&conn, &booking.id).unwrap().unwrap();
    assert_eq!(reloaded.status, BookingStatus::Pending);
    assert_eq!(entry_count(&conn), 0);
    let events: i64 = conn
        .query_row("SELECT COUNT(*) FROM payment_events", [], |r| r.get(0))
        .unwrap();
    assert_eq!(events, 0);
    let letters: i64 = conn
        .query_row("SELECT COUNT(*) FROM dead_letter_events", [], |r| r.get(0))
        .unwrap();
    assert_eq!(letters, 0);
}

#[test]
fn test_malformed_header_rejected() {
    let state = setup_test_state();
    let (body, _) = signed_event("evt_x", "payment.succeeded", serde_json::json!({}));
    assert!(process_event(&state, &body, "garbage").is_err());
    assert!(process_event(&state, &body, "t=123").is_err());
    assert!(process_event(&state, &body, "v1=deadbeef").is_err());
}

// ============ Commission Splits ============

#[test]
fn test_unreferred_booking_splits_90_10() {
    // Scenario: a £100 booking with no referrer yields recipient +£90,
    // platform +£10, both pending_clearing.
    let state = setup_test_state();
    let (booking, provider, _) = setup_confirmed_booking(&state, false);
    let conn = state.db.get().unwrap();

    assert_eq!(booking.status, BookingStatus::Confirmed);

    let entries = queries::ledger_entries_for_booking(&conn, &booking.id).unwrap();
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert_eq!(entry.status, LedgerStatus::PendingClearing);
        assert!(entry.available_at > now(), "Clearing window must be in the future");
    }
    assert_eq!(status_sum(&conn, &provider.id, "pending_clearing"), 9_000);
    assert_eq!(status_sum(&conn, "platform", "pending_clearing"), 1_000);
}

#[test]
fn test_referred_booking_splits_80_10_10() {
    // Scenario: a £100 booking with a bound referrer yields recipient +£80,
    // referrer +£10, platform +£10.
    let state = setup_test_state();
    let (booking, provider, referrer) = setup_confirmed_booking(&state, true);
    let referrer = referrer.unwrap();
    let conn = state.db.get().unwrap();

    let entries = queries::ledger_entries_for_booking(&conn, &booking.id).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(status_sum(&conn, &provider.id, "pending_clearing"), 8_000);
    assert_eq!(status_sum(&conn, &referrer.id, "pending_clearing"), 1_000);
    assert_eq!(status_sum(&conn, "platform", "pending_clearing"), 1_000);

    // Per-event zero sum
    let total: i64 = entries.iter().map(|e| e.amount_minor).sum();
    assert_eq!(total, booking.price_minor);
}

#[test]
fn test_custom_override_rate_applies() {
    let state = setup_test_state();
    let conn = state.db.get().unwrap();

    let provider = create_test_profile(&conn, "Provider", "PROV1234");
    let listing = create_test_listing(&conn, &provider.id, 10_000);
    let customer = create_test_profile(&conn, "Customer", "CUST1234");
    let referrer = create_test_profile(&conn, "Referrer", "REFER123");
    // 20% override on the attribution record
    queries::bind_attribution(
        &conn,
        &customer.id,
        &referrer.id,
        AttributionSource::Code,
        Some(2_000),
    )
    .unwrap();

    let start = now() + 3600;
    let booking = create_test_booking(&conn, &customer, &listing, start, start + 3600);
    drop(conn);
    confirm_booking_via_webhook(&state, &booking, "evt_custom_rate");

    let conn = state.db.get().unwrap();
    assert_eq!(status_sum(&conn, &referrer.id, "pending_clearing"), 2_000);
    assert_eq!(status_sum(&conn, &provider.id, "pending_clearing"), 7_000);
    assert_eq!(status_sum(&conn, "platform", "pending_clearing"), 1_000);
}

// ============ Idempotency ============

#[test]
fn test_duplicate_delivery_processed_once() {
    // Scenario: the same payload (identical external event id) delivered
    // twice results in exactly one transition and one entry set.
    let state = setup_test_state();
    let conn = state.db.get().unwrap();

    let provider = create_test_profile(&conn, "Provider", "PROV1234");
    let listing = create_test_listing(&conn, &provider.id, 10_000);
    let customer = create_test_profile(&conn, "Customer", "CUST1234");
    let start = now() + 3600;
    let booking = create_test_booking(&conn, &customer, &listing, start, start + 3600);

    let (body, sig) = signed_event(
        "evt_dup",
        "payment.succeeded",
        serde_json::json!({
            "booking_id": booking.id,
            "amount_minor": booking.price_minor,
            "currency": booking.currency,
        }),
    );

    let first = process_event(&state, &body, &sig).unwrap();
    assert_eq!(first, Ack::Processed);
    let entries_after_first = entry_count(&conn);

    // Deliver the identical payload again.
    let second = process_event(&state, &body, &sig).unwrap();
    assert_eq!(second, Ack::IdempotentReplay, "Second delivery is a replay");
    assert_eq!(entry_count(&conn), entries_after_first, "Zero new rows on replay");

    let events: i64 = conn
        .query_row("SELECT COUNT(*) FROM payment_events", [], |r| r.get(0))
        .unwrap();
    assert_eq!(events, 1);
}

#[test]
fn test_unknown_event_type_ignored() {
    let state = setup_test_state();
    let (body, sig) = signed_event("evt_other", "customer.updated", serde_json::json!({}));
    assert_eq!(process_event(&state, &body, &sig).unwrap(), Ack::Ignored);
}

// ============ Dead-Lettering ============

#[test]
fn test_malformed_payload_dead_lettered_and_acknowledged() {
    let state = setup_test_state();
    let body = b"{not json".to_vec();
    let sig = sign_payload(&body, TEST_WEBHOOK_SECRET);

    let ack = process_event(&state, &body, &sig).unwrap();
    assert_eq!(ack, Ack::DeadLettered);

    let conn = state.db.get().unwrap();
    let letters = queries::list_unreplayed_dead_letters(&conn, 10).unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].severity, DeadLetterSeverity::Transient);
}

#[test]
fn test_amount_mismatch_is_fatal() {
    let state = setup_test_state();
    let conn = state.db.get().unwrap();

    let provider = create_test_profile(&conn, "Provider", "PROV1234");
    let listing = create_test_listing(&conn, &provider.id, 10_000);
    let customer = create_test_profile(&conn, "Customer", "CUST1234");
    let start = now() + 3600;
    let booking = create_test_booking(&conn, &customer, &listing, start, start + 3600);

    let (body, sig) = signed_event(
        "evt_mismatch",
        "payment.succeeded",
        serde_json::json!({
            "booking_id": booking.id,
            "amount_minor": 5,
            "currency": booking.currency,
        }),
    );

    assert_eq!(process_event(&state, &body, &sig).unwrap(), Ack::DeadLettered);

    // The failed transaction rolled back: booking untouched, no entries.
    let reloaded = queries::get_booking_by_id(&conn, &booking.id).unwrap().unwrap();
    assert_eq!(reloaded.status, BookingStatus::Pending);
    assert_eq!(entry_count(&conn), 0);

    let letters = queries::list_unreplayed_dead_letters(&conn, 10).unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].severity, DeadLetterSeverity::Fatal);
}

#[test]
fn test_refund_before_payment_queues_then_replays() {
    let state = setup_test_state();
    let conn = state.db.get().unwrap();

    let provider = create_test_profile(&conn, "Provider", "PROV1234");
    let listing = create_test_listing(&conn, &provider.id, 10_000);
    let customer = create_test_profile(&conn, "Customer", "CUST1234");
    let start = now() + 3600;
    let booking = create_test_booking(&conn, &customer, &listing, start, start + 3600);

    // Refund arrives before the payment event has been committed.
    let (refund_body, refund_sig) = signed_event(
        "evt_refund_early",
        "payment.refunded",
        serde_json::json!({
            "booking_id": booking.id,
            "amount_minor": 10_000,
            "currency": booking.currency,
        }),
    );
    let ack = process_event(&state, &refund_body, &refund_sig).unwrap();
    assert_eq!(ack, Ack::DeadLettered, "Out-of-order refund is queued");
    assert_eq!(entry_count(&conn), 0, "Dead-lettered refund writes nothing");

    // The original payment lands.
    confirm_booking_via_webhook(&state, &booking, "evt_pay_late");

    // Replay the queued refund from the dead-letter store.
    let letters = queries::list_unreplayed_dead_letters(&conn, 10).unwrap();
    assert_eq!(letters.len(), 1);
    let ack = replay_dead_letter(&state, &letters[0].id).unwrap();
    assert_eq!(ack, Ack::Processed);

    // Fully settled: compensations net every share to zero.
    let entries = queries::ledger_entries_for_booking(&conn, &booking.id).unwrap();
    let net: i64 = entries.iter().map(|e| e.amount_minor).sum();
    assert_eq!(net, 0);

    assert!(queries::list_unreplayed_dead_letters(&conn, 10).unwrap().is_empty());

    // Replaying a settled dead letter is a no-op.
    let again = replay_dead_letter(&state, &letters[0].id).unwrap();
    assert_eq!(again, Ack::IdempotentReplay);
}

// ============ Refund Compensation ============

#[test]
fn test_full_refund_after_clearing_nets_to_zero() {
    // Scenario: a full refund issued after clearing but before payout leaves
    // the original entries untouched and brings every party's net available
    // balance for the booking to exactly zero.
    let state = setup_test_state();
    let (booking, provider, referrer) = setup_confirmed_booking(&state, true);
    let referrer = referrer.unwrap();
    let conn = state.db.get().unwrap();

    clear_all_entries(&conn);
    assert_eq!(queries::available_balance(&conn, &provider.id).unwrap(), 8_000);

    let original_entries = queries::ledger_entries_for_booking(&conn, &booking.id).unwrap();

    let (body, sig) = signed_event(
        "evt_refund_full",
        "payment.refunded",
        serde_json::json!({
            "booking_id": booking.id,
            "amount_minor": 10_000,
            "currency": booking.currency,
        }),
    );
    assert_eq!(process_event(&state, &body, &sig).unwrap(), Ack::Processed);

    // Originals untouched.
    for original in &original_entries {
        let reloaded: (i64, String) = conn
            .query_row(
                "SELECT amount_minor, status FROM ledger_entries WHERE id = ?1",
                rusqlite::params![original.id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(reloaded.0, original.amount_minor);
        assert_eq!(reloaded.1, "available");
    }

    // Net available balance per party is exactly zero.
    assert_eq!(queries::available_balance(&conn, &provider.id).unwrap(), 0);
    assert_eq!(queries::available_balance(&conn, &referrer.id).unwrap(), 0);
    assert_eq!(queries::available_balance(&conn, "platform").unwrap(), 0);

    // Fully refunded confirmed booking settles as cancelled.
    let settled = queries::get_booking_by_id(&conn, &booking.id).unwrap().unwrap();
    assert_eq!(settled.status, BookingStatus::Cancelled);
}

#[test]
fn test_partial_refund_is_proportional() {
    let state = setup_test_state();
    let (booking, provider, referrer) = setup_confirmed_booking(&state, true);
    let referrer = referrer.unwrap();
    let conn = state.db.get().unwrap();

    clear_all_entries(&conn);

    // Refund half of the £100.
    let (body, sig) = signed_event(
        "evt_refund_half",
        "payment.refunded",
        serde_json::json!({
            "booking_id": booking.id,
            "amount_minor": 5_000,
            "currency": booking.currency,
        }),
    );
    assert_eq!(process_event(&state, &body, &sig).unwrap(), Ack::Processed);

    assert_eq!(queries::available_balance(&conn, &provider.id).unwrap(), 4_000);
    assert_eq!(queries::available_balance(&conn, &referrer.id).unwrap(), 500);
    assert_eq!(queries::available_balance(&conn, "platform").unwrap(), 500);

    // Partial refund leaves the booking confirmed.
    let reloaded = queries::get_booking_by_id(&conn, &booking.id).unwrap().unwrap();
    assert_eq!(reloaded.status, BookingStatus::Confirmed);

    // A second refund exceeding the remainder is rejected as fatal.
    let (body, sig) = signed_event(
        "evt_refund_excess",
        "payment.refunded",
        serde_json::json!({
            "booking_id": booking.id,
            "amount_minor": 6_000,
            "currency": booking.currency,
        }),
    );
    assert_eq!(process_event(&state, &body, &sig).unwrap(), Ack::DeadLettered);
    let letters = queries::list_unreplayed_dead_letters(&conn, 10).unwrap();
    assert_eq!(letters.last().unwrap().severity, DeadLetterSeverity::Fatal);
}

#[test]
fn test_refund_before_clearing_clears_to_nothing() {
    // Refund while the original entries are still pending_clearing: the
    // compensations ride the same clearing schedule and the sweep nets
    // everything to zero availability.
    let state = setup_test_state();
    let (booking, provider, _) = setup_confirmed_booking(&state, false);
    let conn = state.db.get().unwrap();

    let (body, sig) = signed_event(
        "evt_refund_preclear",
        "payment.refunded",
        serde_json::json!({
            "booking_id": booking.id,
            "amount_minor": 10_000,
            "currency": booking.currency,
        }),
    );
    assert_eq!(process_event(&state, &body, &sig).unwrap(), Ack::Processed);

    // Before the sweep: pending balance nets to zero already.
    assert_eq!(queries::pending_balance(&conn, &provider.id).unwrap(), 0);
    assert_eq!(queries::available_balance(&conn, &provider.id).unwrap(), 0);

    clear_all_entries(&conn);
    assert_eq!(queries::available_balance(&conn, &provider.id).unwrap(), 0);
    assert_eq!(queries::available_balance(&conn, "platform").unwrap(), 0);
}

#[test]
fn test_dispute_refund_settles_as_refunded() {
    let state = setup_test_state();
    let (booking, _, _) = setup_confirmed_booking(&state, false);
    let conn = state.db.get().unwrap();

    assert!(queries::transition_booking(
        &conn,
        &booking.id,
        &[BookingStatus::Confirmed],
        BookingStatus::Disputed
    )
    .unwrap());

    let (body, sig) = signed_event(
        "evt_refund_dispute",
        "payment.refunded",
        serde_json::json!({
            "booking_id": booking.id,
            "amount_minor": 10_000,
            "currency": booking.currency,
        }),
    );
    assert_eq!(process_event(&state, &body, &sig).unwrap(), Ack::Processed);

    let settled = queries::get_booking_by_id(&conn, &booking.id).unwrap().unwrap();
    assert_eq!(settled.status, BookingStatus::Refunded);
}
