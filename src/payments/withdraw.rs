//! Withdrawal requests over the available ledger balance.
//!
//! A withdrawal reserves concrete ledger entries (oldest first) for a payout
//! by stamping them with the payout ID. Reservation never edits amounts: when
//! the last entry overshoots the requested amount, the entry is split by
//! reversal - the original is reversed and two equal-and-opposite
//! compensations on the same payment event are appended, one reserved and one
//! left available - so every event's non-reversed sum is preserved.

use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{CreateLedgerEntry, LedgerStatus, Payout};

/// Reserve available funds and create a payout request.
///
/// Fails with `InsufficientFunds` when `amount_minor` exceeds the party's
/// available (unreserved) balance. The balance check and the reservation run
/// in one immediate transaction, so two concurrent withdrawals cannot spend
/// the same entry.
pub fn request_withdrawal(
    conn: &mut Connection,
    party_id: &str,
    amount_minor: i64,
) -> Result<Payout> {
    if amount_minor <= 0 {
        return Err(AppError::Validation(
            "withdrawal amount must be positive".into(),
        ));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let available = queries::available_balance(&tx, party_id)?;
    if amount_minor > available {
        return Err(AppError::InsufficientFunds {
            requested: amount_minor,
            available,
        });
    }

    let payout = queries::create_payout(&tx, party_id, amount_minor)?;

    // Oldest first. Negative compensations (from refunds) are reserved
    // unconditionally as they are encountered so they settle alongside the
    // positive entries they offset.
    let mut remaining = amount_minor;
    for entry in queries::reservable_entries(&tx, party_id)? {
        if remaining == 0 {
            break;
        }

        if entry.amount_minor <= remaining {
            if !queries::reserve_entry_for_payout(&tx, &entry.id, &payout.id)? {
                return Err(AppError::Conflict(format!(
                    "entry {} was reserved concurrently",
                    entry.id
                )));
            }
            remaining -= entry.amount_minor;
            continue;
        }

        // Overshoot: split the entry by reversal.
        let change = entry.amount_minor - remaining;
        if !queries::reverse_entry(&tx, &entry.id)? {
            return Err(AppError::Conflict(format!(
                "entry {} was reserved concurrently",
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
                amount_minor: remaining,
                status: LedgerStatus::Available,
                available_at: entry.available_at,
                payout_id: Some(payout.id.clone()),
            },
        )?;
        queries::create_ledger_entry(
            &tx,
            &CreateLedgerEntry {
                payment_event_id: entry.payment_event_id,
                booking_id: entry.booking_id,
                party_id: entry.party_id,
                role: entry.role,
                amount_minor: change,
                status: LedgerStatus::Available,
                available_at: entry.available_at,
                payout_id: None,
            },
        )?;
        remaining = 0;
    }

    if remaining != 0 {
        // The balance check above guarantees coverage; hitting this means the
        // ledger is inconsistent. Roll back by dropping the transaction.
        return Err(AppError::Internal(format!(
            "reservation for payout {} left {} uncovered",
            payout.id, remaining
        )));
    }

    tx.commit()?;

    tracing::info!(
        "Withdrawal requested: payout={}, party={}, amount={}",
        payout.id,
        party_id,
        amount_minor
    );

    Ok(payout)
}
