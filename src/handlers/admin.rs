//! Dead-letter inspection and replay.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::models::DeadLetterEvent;
use crate::payments::{replay_dead_letter, Ack};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/dead-letters", get(list_dead_letters))
        .route("/admin/dead-letters/{id}/replay", post(replay))
}

pub async fn list_dead_letters(
    State(state): State<AppState>,
) -> Result<Json<Vec<DeadLetterEvent>>> {
    let conn = state.db.get()?;
    let letters = queries::list_unreplayed_dead_letters(&conn, 100)?;
    Ok(Json(letters))
}

#[derive(Serialize)]
pub struct ReplayResponse {
    pub outcome: &'static str,
}

pub async fn replay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReplayResponse>> {
    let outcome = match replay_dead_letter(&state, &id)? {
        Ack::Processed => "processed",
        Ack::IdempotentReplay => "already_processed",
        Ack::Ignored => "ignored",
        Ack::DeadLettered => "failed_again",
    };
    Ok(Json(ReplayResponse { outcome }))
}
