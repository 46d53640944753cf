pub mod admin;
pub mod bookings;
pub mod referrals;
pub mod webhooks;
pub mod withdrawals;

use axum::Router;

use crate::db::AppState;

/// Assemble the full API surface.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(bookings::router())
        .merge(referrals::router())
        .merge(withdrawals::router())
        .merge(webhooks::router())
        .merge(admin::router())
}
