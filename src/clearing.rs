//! The clearing sweep.
//!
//! Commission funds sit in `pending_clearing` for the configured clearing
//! period before becoming withdrawable. A periodic background task - never a
//! request handler - advances due entries to `available`. The advance is a
//! single claim-and-advance UPDATE whose status predicate doubles as the
//! claim, so running overlapping sweeps (multiple instances, restarts,
//! manual runs) advances each entry exactly once.

use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::payments::replay_dead_letter;

/// Entries advanced per sweep batch. The sweep loops until a batch comes up
/// short, so the limit bounds transaction size, not throughput.
const SWEEP_BATCH_SIZE: i64 = 500;

/// Transient dead letters retried per cycle, and the attempt cap after which
/// an event waits for manual replay.
const REPLAY_BATCH_SIZE: i64 = 50;
const REPLAY_MAX_ATTEMPTS: i64 = 5;

/// Advance all due entries as of `as_of`. Returns the total advanced.
pub fn run_sweep(conn: &Connection, as_of: i64) -> Result<usize> {
    let mut total = 0;
    loop {
        let advanced = queries::advance_due_entries(conn, as_of, SWEEP_BATCH_SIZE)?;
        total += advanced;
        if advanced < SWEEP_BATCH_SIZE as usize {
            break;
        }
    }
    Ok(total)
}

/// Replay transient dead letters that haven't exhausted their attempts.
/// Returns how many replayed successfully.
pub fn replay_transient_dead_letters(state: &AppState) -> Result<usize> {
    let conn = state.db.get()?;
    let letters =
        queries::list_replayable_dead_letters(&conn, REPLAY_MAX_ATTEMPTS, REPLAY_BATCH_SIZE)?;
    drop(conn);

    let mut replayed = 0;
    for letter in letters {
        match replay_dead_letter(state, &letter.id) {
            Ok(crate::payments::Ack::Processed) | Ok(crate::payments::Ack::IdempotentReplay) => {
                replayed += 1;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Scheduled replay of dead letter {} errored: {}", letter.id, e);
            }
        }
    }
    Ok(replayed)
}

/// Spawn the periodic clearing sweep and dead-letter replay task.
pub fn spawn_sweep_task(state: AppState, interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_secs);

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => match run_sweep(&conn, Utc::now().timestamp()) {
                    Ok(count) => {
                        if count > 0 {
                            tracing::info!("Clearing sweep advanced {} entries", count);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Clearing sweep failed: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to get db connection for clearing sweep: {}", e);
                }
            }

            match replay_transient_dead_letters(&state) {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!("Replayed {} dead-lettered events", count);
                    }
                }
                Err(e) => {
                    tracing::warn!("Dead-letter replay cycle failed: {}", e);
                }
            }
        }
    });

    tracing::info!(
        "Clearing sweep task started (runs every {} seconds)",
        interval_secs
    );
}
