//! Withdrawal requests and party balances.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::models::Payout;
use crate::payments::withdraw::request_withdrawal;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/withdrawals", post(create_withdrawal))
        .route("/parties/{id}/balance", get(get_balance))
}

#[derive(Deserialize)]
pub struct WithdrawalRequest {
    pub party_id: String,
    pub amount_minor: i64,
}

/// Reserve available funds into a payout and submit it to the processor.
///
/// The reservation commits first; the processor's answer arrives later as a
/// `payout.completed` or `payout.failed` event. A failed submission leaves
/// the payout in `requested` for reconciliation rather than unwinding the
/// reservation here.
pub async fn create_withdrawal(
    State(state): State<AppState>,
    Json(input): Json<WithdrawalRequest>,
) -> Result<(StatusCode, Json<Payout>)> {
    let mut conn = state.db.get()?;
    let payout = request_withdrawal(&mut conn, &input.party_id, input.amount_minor)?;
    drop(conn);

    if let Err(e) = state
        .gateway
        .submit_payout(&payout.id, &payout.party_id, payout.amount_minor)
        .await
    {
        tracing::error!(
            "Payout {} submission failed, awaiting reconciliation: {}",
            payout.id,
            e
        );
    }

    Ok((StatusCode::ACCEPTED, Json(payout)))
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub party_id: String,
    /// Withdrawable now.
    pub available_minor: i64,
    /// Still inside the clearing window.
    pub pending_minor: i64,
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BalanceResponse>> {
    let conn = state.db.get()?;
    let available_minor = queries::available_balance(&conn, &id)?;
    let pending_minor = queries::pending_balance(&conn, &id)?;
    Ok(Json(BalanceResponse {
        party_id: id,
        available_minor,
        pending_minor,
    }))
}
