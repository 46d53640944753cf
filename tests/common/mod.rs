//! Test utilities and fixtures for bookpay integration tests

#![allow(dead_code)]

use rusqlite::Connection;

pub use bookpay::db::{create_pool, init_db, queries, AppState};
pub use bookpay::models::*;
pub use bookpay::payments::{process_event, replay_dead_letter, Ack, PaymentGateway};
pub use bookpay::split::RateTable;
pub use bookpay::token::TokenService;

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const TEST_TOKEN_SECRET: &str = "tksec_test_secret";

/// Clearing period used by test state (7 days).
pub const TEST_CLEARING_SECS: i64 = 7 * 86400;

/// Pending reservation TTL used by test state (15 minutes).
pub const TEST_RESERVATION_TTL_SECS: i64 = 900;

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Create an app state over a fresh file-backed database.
///
/// File-backed (in a temp dir) rather than in-memory so every pooled
/// connection sees the same database, matching production concurrency.
pub fn setup_test_state() -> AppState {
    let path = std::env::temp_dir().join(format!("bookpay-test-{}.db", uuid::Uuid::new_v4()));
    let pool = create_pool(path.to_str().expect("temp path is valid UTF-8"))
        .expect("Failed to create test pool");
    {
        let conn = pool.get().expect("Failed to get test connection");
        init_db(&conn).expect("Failed to initialize schema");
    }
    AppState {
        db: pool,
        tokens: TokenService::new(TEST_TOKEN_SECRET, None, 3600),
        webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
        rates: RateTable::default(),
        clearing_period_secs: TEST_CLEARING_SECS,
        reservation_ttl_secs: TEST_RESERVATION_TTL_SECS,
        gateway: PaymentGateway::new("http://127.0.0.1:1"),
        http_client: reqwest::Client::new(),
        notify_webhook_url: None,
        base_url: "http://localhost:3000".to_string(),
    }
}

/// Create a test profile with a referral code.
pub fn create_test_profile(conn: &Connection, name: &str, code: &str) -> Profile {
    queries::create_profile(
        conn,
        &CreateProfile {
            display_name: name.to_string(),
            referral_code: code.to_string(),
        },
    )
    .expect("Failed to create test profile")
}

/// Create a test listing priced in pence.
pub fn create_test_listing(conn: &Connection, provider_id: &str, price_minor: i64) -> Listing {
    queries::create_listing(
        conn,
        &CreateListing {
            provider_id: provider_id.to_string(),
            title: "One-hour session".to_string(),
            price_minor,
            currency: "gbp".to_string(),
            terms: Some("48h cancellation notice".to_string()),
        },
    )
    .expect("Failed to create test listing")
}

/// Reserve a slot for a customer, expecting success.
pub fn create_test_booking(
    conn: &Connection,
    customer: &Profile,
    listing: &Listing,
    starts_at: i64,
    ends_at: i64,
) -> Booking {
    let referrer_id = queries::get_attribution(conn, &customer.id)
        .expect("Failed to read attribution")
        .map(|a| a.referrer_id);
    queries::try_reserve_slot(
        conn,
        &CreateBooking {
            customer_id: customer.id.clone(),
            listing_id: listing.id.clone(),
            starts_at,
            ends_at,
        },
        listing,
        referrer_id.as_deref(),
        TEST_RESERVATION_TTL_SECS,
    )
    .expect("Failed to reserve slot")
    .expect("Slot should be free")
}

/// Build a signed webhook body + signature header for an event.
pub fn signed_event(event_id: &str, event_type: &str, data: serde_json::Value) -> (Vec<u8>, String) {
    let body = serde_json::json!({
        "id": event_id,
        "type": event_type,
        "data": data,
    })
    .to_string()
    .into_bytes();
    let header = sign_payload(&body, TEST_WEBHOOK_SECRET);
    (body, header)
}

/// Compute a `t=...,v1=...` signature header over a payload.
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let timestamp = now().to_string();
    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signed_payload.as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

/// Deliver a payment.succeeded event for a booking and expect it processed.
pub fn confirm_booking_via_webhook(state: &AppState, booking: &Booking, event_id: &str) {
    let (body, sig) = signed_event(
        event_id,
        "payment.succeeded",
        serde_json::json!({
            "booking_id": booking.id,
            "amount_minor": booking.price_minor,
            "currency": booking.currency,
        }),
    );
    let ack = process_event(state, &body, &sig).expect("Event should be accepted");
    assert_eq!(ack, Ack::Processed, "payment.succeeded should process");
}

/// Force all of a party's clearing entries due and run the sweep.
pub fn clear_all_entries(conn: &Connection) {
    conn.execute(
        "UPDATE ledger_entries SET available_at = 0 WHERE status = 'pending_clearing'",
        [],
    )
    .expect("Failed to age clearing entries");
    bookpay::clearing::run_sweep(conn, now()).expect("Sweep should succeed");
}

/// Sum of a party's entries in a given status (reserved ones included).
pub fn status_sum(conn: &Connection, party_id: &str, status: &str) -> i64 {
    conn.query_row(
        "SELECT COALESCE(SUM(amount_minor), 0) FROM ledger_entries WHERE party_id = ?1 AND status = ?2",
        rusqlite::params![party_id, status],
        |row| row.get(0),
    )
    .expect("Failed to sum entries")
}
