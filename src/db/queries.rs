use chrono::Utc;
use rusqlite::{params, params_from_iter, types::Value, Connection};

use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    query_all, query_one, ATTRIBUTION_COLS, BOOKING_COLS, DEAD_LETTER_COLS, LEDGER_ENTRY_COLS,
    LISTING_COLS, PAYMENT_EVENT_COLS, PAYOUT_COLS, PROFILE_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Profiles ============

pub fn create_profile(conn: &Connection, input: &CreateProfile) -> Result<Profile> {
    let profile = Profile {
        id: EntityType::Profile.gen_id(),
        display_name: input.display_name.clone(),
        referral_code: input.referral_code.clone(),
        created_at: now(),
    };
    conn.execute(
        "INSERT INTO profiles (id, display_name, referral_code, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            profile.id,
            profile.display_name,
            profile.referral_code,
            profile.created_at
        ],
    )?;
    Ok(profile)
}

pub fn get_profile_by_id(conn: &Connection, id: &str) -> Result<Option<Profile>> {
    query_one(
        conn,
        &format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLS),
        &[&id],
    )
}

pub fn get_profile_by_referral_code(conn: &Connection, code: &str) -> Result<Option<Profile>> {
    query_one(
        conn,
        &format!("SELECT {} FROM profiles WHERE referral_code = ?1", PROFILE_COLS),
        &[&code],
    )
}

// ============ Listings ============

pub fn create_listing(conn: &Connection, input: &CreateListing) -> Result<Listing> {
    let ts = now();
    let listing = Listing {
        id: EntityType::Listing.gen_id(),
        provider_id: input.provider_id.clone(),
        title: input.title.clone(),
        price_minor: input.price_minor,
        currency: input.currency.clone(),
        terms: input.terms.clone(),
        created_at: ts,
        updated_at: ts,
    };
    conn.execute(
        "INSERT INTO listings (id, provider_id, title, price_minor, currency, terms, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            listing.id,
            listing.provider_id,
            listing.title,
            listing.price_minor,
            listing.currency,
            listing.terms,
            listing.created_at,
            listing.updated_at
        ],
    )?;
    Ok(listing)
}

pub fn get_listing_by_id(conn: &Connection, id: &str) -> Result<Option<Listing>> {
    query_one(
        conn,
        &format!("SELECT {} FROM listings WHERE id = ?1", LISTING_COLS),
        &[&id],
    )
}

// ============ Referral Attributions ============

/// Bind a subject to a referrer, first-write-wins.
///
/// Uses INSERT OR IGNORE against the subject_id primary key: repeated calls
/// with the same subject are no-ops and return false, leaving the original
/// binding untouched.
pub fn bind_attribution(
    conn: &Connection,
    subject_id: &str,
    referrer_id: &str,
    source: AttributionSource,
    custom_rate_bp: Option<i64>,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO referral_attributions (subject_id, referrer_id, source, custom_rate_bp, bound_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![subject_id, referrer_id, source.as_str(), custom_rate_bp, now()],
    )?;
    Ok(affected > 0)
}

pub fn get_attribution(conn: &Connection, subject_id: &str) -> Result<Option<ReferralAttribution>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM referral_attributions WHERE subject_id = ?1",
            ATTRIBUTION_COLS
        ),
        &[&subject_id],
    )
}

// ============ Bookings ============

/// Atomically check-and-reserve a provider time slot.
///
/// The overlap test and the insert are one SQL statement, so two concurrent
/// requests for the same slot resolve deterministically: exactly one inserts
/// a row, the other sees zero affected rows and gets `Ok(None)`.
///
/// A pending booking blocks the slot only while younger than
/// `reservation_ttl_secs`; older unpaid holds are ignored (auto-release).
pub fn try_reserve_slot(
    conn: &Connection,
    input: &CreateBooking,
    listing: &Listing,
    referrer_id: Option<&str>,
    reservation_ttl_secs: i64,
) -> Result<Option<Booking>> {
    let id = EntityType::Booking.gen_id();
    let ts = now();
    let affected = conn.execute(
        "INSERT INTO bookings (id, provider_id, customer_id, listing_id, starts_at, ends_at,
                               price_minor, currency, terms_snapshot, referrer_id, status,
                               created_at, updated_at)
         SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11, ?11
         WHERE NOT EXISTS (
             SELECT 1 FROM bookings
             WHERE provider_id = ?2
               AND starts_at < ?6 AND ends_at > ?5
               AND (status = 'confirmed'
                    OR (status = 'pending' AND created_at > ?11 - ?12))
         )",
        params![
            id,
            listing.provider_id,
            input.customer_id,
            input.listing_id,
            input.starts_at,
            input.ends_at,
            listing.price_minor,
            listing.currency,
            listing.terms,
            referrer_id,
            ts,
            reservation_ttl_secs
        ],
    )?;

    if affected == 0 {
        return Ok(None);
    }
    get_booking_by_id(conn, &id)
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> Result<Option<Booking>> {
    query_one(
        conn,
        &format!("SELECT {} FROM bookings WHERE id = ?1", BOOKING_COLS),
        &[&id],
    )
}

/// Compare-and-swap a booking status.
///
/// Returns true only when the booking was in one of the `from` states; the
/// state machine is enforced here, not by callers re-reading first.
pub fn transition_booking(
    conn: &Connection,
    id: &str,
    from: &[BookingStatus],
    to: BookingStatus,
) -> Result<bool> {
    let placeholders = from.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!(
        "UPDATE bookings SET status = ?, updated_at = ? WHERE id = ? AND status IN ({})",
        placeholders
    );
    let mut values: Vec<Value> = vec![
        to.as_str().to_string().into(),
        now().into(),
        id.to_string().into(),
    ];
    values.extend(from.iter().map(|s| Value::from(s.as_str().to_string())));
    let affected = conn.execute(&sql, params_from_iter(values))?;
    Ok(affected > 0)
}

/// Re-arm an expired pending reservation for a checkout retry.
///
/// Re-validates the overlap against *other* bookings in the same statement;
/// returns false if the slot was taken while the hold was lapsed.
pub fn refresh_pending_reservation(
    conn: &Connection,
    booking_id: &str,
    reservation_ttl_secs: i64,
) -> Result<bool> {
    let ts = now();
    let affected = conn.execute(
        "UPDATE bookings SET created_at = ?2, updated_at = ?2
         WHERE id = ?1 AND status = 'pending'
           AND NOT EXISTS (
               SELECT 1 FROM bookings b2
               WHERE b2.provider_id = bookings.provider_id
                 AND b2.id <> bookings.id
                 AND b2.starts_at < bookings.ends_at AND b2.ends_at > bookings.starts_at
                 AND (b2.status = 'confirmed'
                      OR (b2.status = 'pending' AND b2.created_at > ?2 - ?3))
           )",
        params![booking_id, ts, reservation_ttl_secs],
    )?;
    Ok(affected > 0)
}

// ============ Payment Events ============

/// Atomically record a payment event, returning true if this is a new event.
///
/// The UNIQUE constraint on external_event_id plus INSERT OR IGNORE makes
/// this the idempotency check: a redelivered event inserts nothing and
/// returns false. Run inside the same transaction as the event's effects so
/// the check and the writes commit or roll back together.
pub fn try_record_payment_event(
    conn: &Connection,
    external_event_id: &str,
    kind: &str,
    booking_id: Option<&str>,
    payout_id: Option<&str>,
    gross_minor: i64,
) -> Result<Option<String>> {
    let id = EntityType::PaymentEvent.gen_id();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO payment_events (id, external_event_id, kind, booking_id, payout_id, gross_minor, processed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![id, external_event_id, kind, booking_id, payout_id, gross_minor, now()],
    )?;
    Ok((affected > 0).then_some(id))
}

pub fn get_payment_event_by_external_id(
    conn: &Connection,
    external_event_id: &str,
) -> Result<Option<PaymentEventRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_events WHERE external_event_id = ?1",
            PAYMENT_EVENT_COLS
        ),
        &[&external_event_id],
    )
}

/// The committed capture event for a booking, if any.
pub fn get_payment_for_booking(
    conn: &Connection,
    booking_id: &str,
) -> Result<Option<PaymentEventRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_events WHERE booking_id = ?1 AND kind = 'payment.succeeded'",
            PAYMENT_EVENT_COLS
        ),
        &[&booking_id],
    )
}

/// Total already refunded against a booking, as a positive number.
pub fn refunded_total_for_booking(conn: &Connection, booking_id: &str) -> Result<i64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(-gross_minor), 0) FROM payment_events
         WHERE booking_id = ?1 AND kind = 'payment.refunded'",
        params![booking_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

// ============ Ledger ============

pub fn create_ledger_entry(conn: &Connection, input: &CreateLedgerEntry) -> Result<LedgerEntry> {
    let entry = LedgerEntry {
        id: EntityType::LedgerEntry.gen_id(),
        payment_event_id: input.payment_event_id.clone(),
        booking_id: input.booking_id.clone(),
        party_id: input.party_id.clone(),
        role: input.role,
        amount_minor: input.amount_minor,
        status: input.status,
        available_at: input.available_at,
        payout_id: input.payout_id.clone(),
        created_at: now(),
    };
    conn.execute(
        "INSERT INTO ledger_entries (id, payment_event_id, booking_id, party_id, role, amount_minor, status, available_at, payout_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.id,
            entry.payment_event_id,
            entry.booking_id,
            entry.party_id,
            entry.role.as_str(),
            entry.amount_minor,
            entry.status.as_str(),
            entry.available_at,
            entry.payout_id,
            entry.created_at
        ],
    )?;
    Ok(entry)
}

pub fn ledger_entries_for_event(
    conn: &Connection,
    payment_event_id: &str,
) -> Result<Vec<LedgerEntry>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM ledger_entries WHERE payment_event_id = ?1 ORDER BY created_at, id",
            LEDGER_ENTRY_COLS
        ),
        &[&payment_event_id],
    )
}

pub fn ledger_entries_for_booking(conn: &Connection, booking_id: &str) -> Result<Vec<LedgerEntry>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM ledger_entries WHERE booking_id = ?1 ORDER BY created_at, id",
            LEDGER_ENTRY_COLS
        ),
        &[&booking_id],
    )
}

/// Withdrawable balance: available entries not reserved for a payout.
pub fn available_balance(conn: &Connection, party_id: &str) -> Result<i64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount_minor), 0) FROM ledger_entries
         WHERE party_id = ?1 AND status = 'available' AND payout_id IS NULL",
        params![party_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Balance still in the clearing window.
pub fn pending_balance(conn: &Connection, party_id: &str) -> Result<i64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount_minor), 0) FROM ledger_entries
         WHERE party_id = ?1 AND status = 'pending_clearing'",
        params![party_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Advance due pending_clearing entries to available, claim-and-advance.
///
/// The status predicate is part of the claim, so concurrent sweepers never
/// advance the same row twice; a second run in the same period is a no-op.
/// Returns the number of entries advanced.
pub fn advance_due_entries(conn: &Connection, as_of: i64, limit: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE ledger_entries SET status = 'available'
         WHERE status = 'pending_clearing' AND available_at <= ?1
           AND id IN (
               SELECT id FROM ledger_entries
               WHERE status = 'pending_clearing' AND available_at <= ?1
               ORDER BY available_at
               LIMIT ?2
           )",
        params![as_of, limit],
    )?;
    Ok(affected)
}

/// Unreserved available entries for a party, oldest first (withdrawal order).
pub fn reservable_entries(conn: &Connection, party_id: &str) -> Result<Vec<LedgerEntry>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM ledger_entries
             WHERE party_id = ?1 AND status = 'available' AND payout_id IS NULL
             ORDER BY available_at, created_at, id",
            LEDGER_ENTRY_COLS
        ),
        &[&party_id],
    )
}

/// Reserve an available entry for a payout. CAS on (status, payout_id) so a
/// concurrent withdrawal cannot double-spend the entry.
pub fn reserve_entry_for_payout(
    conn: &Connection,
    entry_id: &str,
    payout_id: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE ledger_entries SET payout_id = ?2
         WHERE id = ?1 AND status = 'available' AND payout_id IS NULL",
        params![entry_id, payout_id],
    )?;
    Ok(affected > 0)
}

/// Mark an available entry reversed (annihilated by an equal compensating
/// entry appended in the same transaction).
pub fn reverse_entry(conn: &Connection, entry_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE ledger_entries SET status = 'reversed', payout_id = NULL
         WHERE id = ?1 AND status = 'available'",
        params![entry_id],
    )?;
    Ok(affected > 0)
}

pub fn entries_for_payout(conn: &Connection, payout_id: &str) -> Result<Vec<LedgerEntry>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM ledger_entries WHERE payout_id = ?1 ORDER BY created_at, id",
            LEDGER_ENTRY_COLS
        ),
        &[&payout_id],
    )
}

/// Settle a completed payout: reserved entries become paid_out.
pub fn mark_payout_entries_paid(conn: &Connection, payout_id: &str) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE ledger_entries SET status = 'paid_out'
         WHERE payout_id = ?1 AND status = 'available'",
        params![payout_id],
    )?;
    Ok(affected)
}

// ============ Payouts ============

pub fn create_payout(conn: &Connection, party_id: &str, amount_minor: i64) -> Result<Payout> {
    let ts = now();
    let payout = Payout {
        id: EntityType::Payout.gen_id(),
        party_id: party_id.to_string(),
        amount_minor,
        status: PayoutStatus::Requested,
        created_at: ts,
        updated_at: ts,
    };
    conn.execute(
        "INSERT INTO payouts (id, party_id, amount_minor, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            payout.id,
            payout.party_id,
            payout.amount_minor,
            payout.status.as_str(),
            payout.created_at,
            payout.updated_at
        ],
    )?;
    Ok(payout)
}

pub fn get_payout_by_id(conn: &Connection, id: &str) -> Result<Option<Payout>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payouts WHERE id = ?1", PAYOUT_COLS),
        &[&id],
    )
}

/// Compare-and-swap a payout status; false when already settled.
pub fn transition_payout(
    conn: &Connection,
    id: &str,
    from: PayoutStatus,
    to: PayoutStatus,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payouts SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
        params![id, from.as_str(), to.as_str(), now()],
    )?;
    Ok(affected > 0)
}

// ============ Dead-Letter Store ============

pub fn create_dead_letter(
    conn: &Connection,
    external_event_id: Option<&str>,
    payload: &str,
    error: &str,
    severity: DeadLetterSeverity,
) -> Result<DeadLetterEvent> {
    let event = DeadLetterEvent {
        id: EntityType::DeadLetter.gen_id(),
        external_event_id: external_event_id.map(String::from),
        payload: payload.to_string(),
        error: error.to_string(),
        severity,
        attempts: 1,
        created_at: now(),
        replayed_at: None,
    };
    conn.execute(
        "INSERT INTO dead_letter_events (id, external_event_id, payload, error, severity, attempts, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.id,
            event.external_event_id,
            event.payload,
            event.error,
            event.severity.as_str(),
            event.attempts,
            event.created_at
        ],
    )?;
    Ok(event)
}

pub fn get_dead_letter_by_id(conn: &Connection, id: &str) -> Result<Option<DeadLetterEvent>> {
    query_one(
        conn,
        &format!("SELECT {} FROM dead_letter_events WHERE id = ?1", DEAD_LETTER_COLS),
        &[&id],
    )
}

pub fn list_unreplayed_dead_letters(conn: &Connection, limit: i64) -> Result<Vec<DeadLetterEvent>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM dead_letter_events WHERE replayed_at IS NULL ORDER BY created_at LIMIT ?1",
            DEAD_LETTER_COLS
        ),
        &[&limit],
    )
}

/// Transient dead letters eligible for scheduled replay. Fatal ones wait for
/// a human; attempts are capped so a poison event stops cycling.
pub fn list_replayable_dead_letters(
    conn: &Connection,
    max_attempts: i64,
    limit: i64,
) -> Result<Vec<DeadLetterEvent>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM dead_letter_events
             WHERE replayed_at IS NULL AND severity = 'transient' AND attempts <= ?1
             ORDER BY created_at LIMIT ?2",
            DEAD_LETTER_COLS
        ),
        &[&max_attempts, &limit],
    )
}

/// Mark a dead letter successfully replayed. CAS on replayed_at so two
/// concurrent replays settle it once.
pub fn mark_dead_letter_replayed(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE dead_letter_events SET replayed_at = ?2 WHERE id = ?1 AND replayed_at IS NULL",
        params![id, now()],
    )?;
    Ok(affected > 0)
}

/// Record a failed replay attempt, keeping the latest error.
pub fn bump_dead_letter_attempt(conn: &Connection, id: &str, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE dead_letter_events SET attempts = attempts + 1, error = ?2 WHERE id = ?1",
        params![id, error],
    )?;
    Ok(())
}
