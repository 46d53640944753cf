//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// Graceful handling instead of panicking when the database contains an
/// invalid enum value (corruption, migration errors, etc.).
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const PROFILE_COLS: &str = "id, display_name, referral_code, created_at";

pub const LISTING_COLS: &str =
    "id, provider_id, title, price_minor, currency, terms, created_at, updated_at";

pub const ATTRIBUTION_COLS: &str =
    "subject_id, referrer_id, source, custom_rate_bp, bound_at";

pub const BOOKING_COLS: &str = "id, provider_id, customer_id, listing_id, starts_at, ends_at, price_minor, currency, terms_snapshot, referrer_id, status, created_at, updated_at";

pub const PAYMENT_EVENT_COLS: &str =
    "id, external_event_id, kind, booking_id, payout_id, gross_minor, processed_at";

pub const LEDGER_ENTRY_COLS: &str = "id, payment_event_id, booking_id, party_id, role, amount_minor, status, available_at, payout_id, created_at";

pub const PAYOUT_COLS: &str = "id, party_id, amount_minor, status, created_at, updated_at";

pub const DEAD_LETTER_COLS: &str =
    "id, external_event_id, payload, error, severity, attempts, created_at, replayed_at";

// ============ FromRow Implementations ============

impl FromRow for Profile {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Profile {
            id: row.get(0)?,
            display_name: row.get(1)?,
            referral_code: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for Listing {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Listing {
            id: row.get(0)?,
            provider_id: row.get(1)?,
            title: row.get(2)?,
            price_minor: row.get(3)?,
            currency: row.get(4)?,
            terms: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

impl FromRow for ReferralAttribution {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ReferralAttribution {
            subject_id: row.get(0)?,
            referrer_id: row.get(1)?,
            source: parse_enum(row, 2, "source")?,
            custom_rate_bp: row.get(3)?,
            bound_at: row.get(4)?,
        })
    }
}

impl FromRow for Booking {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Booking {
            id: row.get(0)?,
            provider_id: row.get(1)?,
            customer_id: row.get(2)?,
            listing_id: row.get(3)?,
            starts_at: row.get(4)?,
            ends_at: row.get(5)?,
            price_minor: row.get(6)?,
            currency: row.get(7)?,
            terms_snapshot: row.get(8)?,
            referrer_id: row.get(9)?,
            status: parse_enum(row, 10, "status")?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

impl FromRow for PaymentEventRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PaymentEventRecord {
            id: row.get(0)?,
            external_event_id: row.get(1)?,
            kind: row.get(2)?,
            booking_id: row.get(3)?,
            payout_id: row.get(4)?,
            gross_minor: row.get(5)?,
            processed_at: row.get(6)?,
        })
    }
}

impl FromRow for LedgerEntry {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(LedgerEntry {
            id: row.get(0)?,
            payment_event_id: row.get(1)?,
            booking_id: row.get(2)?,
            party_id: row.get(3)?,
            role: parse_enum(row, 4, "role")?,
            amount_minor: row.get(5)?,
            status: parse_enum(row, 6, "status")?,
            available_at: row.get(7)?,
            payout_id: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

impl FromRow for Payout {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Payout {
            id: row.get(0)?,
            party_id: row.get(1)?,
            amount_minor: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl FromRow for DeadLetterEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(DeadLetterEvent {
            id: row.get(0)?,
            external_event_id: row.get(1)?,
            payload: row.get(2)?,
            error: row.get(3)?,
            severity: parse_enum(row, 4, "severity")?,
            attempts: row.get(5)?,
            created_at: row.get(6)?,
            replayed_at: row.get(7)?,
        })
    }
}
