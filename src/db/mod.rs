mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::payments::PaymentGateway;
use crate::split::RateTable;
use crate::token::TokenService;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Signed attribution token issuer/validator.
    pub tokens: TokenService,
    /// Shared secret for inbound payment processor webhooks.
    pub webhook_secret: String,
    /// Commission rate table, passed as plain data into split calculation.
    pub rates: RateTable,
    pub clearing_period_secs: i64,
    pub reservation_ttl_secs: i64,
    /// Outbound client for the external payment processor.
    pub gateway: PaymentGateway,
    /// Shared HTTP client for fire-and-forget notification webhooks.
    pub http_client: reqwest::Client,
    pub notify_webhook_url: Option<String>,
    pub base_url: String,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    // Pragmas are per-connection, so they run on every pooled connection:
    // WAL for concurrent webhook/sweep/withdrawal writers, busy_timeout to
    // serialize contended write transactions instead of erroring.
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });
    Pool::builder().max_size(10).build(manager)
}
