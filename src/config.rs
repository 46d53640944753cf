use std::env;

/// Default clearing delay before commission funds become withdrawable (7 days).
const DEFAULT_CLEARING_PERIOD_SECS: i64 = 7 * 86400;

/// Default lifetime of a signed attribution token (30 days).
const DEFAULT_TOKEN_TTL_SECS: i64 = 30 * 86400;

/// Default hold on an unpaid pending booking before the slot auto-releases (15 minutes).
const DEFAULT_RESERVATION_TTL_SECS: i64 = 15 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    /// Shared secret for inbound payment processor webhook signatures.
    pub webhook_secret: String,
    /// Current secret for signing attribution tokens.
    pub token_secret: String,
    /// Previous token secret, accepted during key rotation.
    pub token_secret_previous: Option<String>,
    pub token_ttl_secs: i64,
    pub clearing_period_secs: i64,
    pub reservation_ttl_secs: i64,
    /// Interval between clearing sweep runs.
    pub sweep_interval_secs: u64,
    /// Payment processor API base URL (checkout sessions, refunds, payouts).
    pub processor_api_url: String,
    /// Webhook URL for outbound notification events (None = notifications disabled).
    pub notify_webhook_url: Option<String>,
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("BOOKPAY_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "bookpay.db".to_string()),
            base_url,
            webhook_secret: env::var("WEBHOOK_SECRET")
                .unwrap_or_else(|_| "whsec_dev_only".to_string()),
            token_secret: env::var("TOKEN_SECRET")
                .unwrap_or_else(|_| "tksec_dev_only".to_string()),
            token_secret_previous: env::var("TOKEN_SECRET_PREVIOUS").ok(),
            token_ttl_secs: env_i64("TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS),
            clearing_period_secs: env_i64("CLEARING_PERIOD_SECS", DEFAULT_CLEARING_PERIOD_SECS),
            reservation_ttl_secs: env_i64("RESERVATION_TTL_SECS", DEFAULT_RESERVATION_TTL_SECS),
            sweep_interval_secs: env_i64("SWEEP_INTERVAL_SECS", 60) as u64,
            processor_api_url: env::var("PROCESSOR_API_URL")
                .unwrap_or_else(|_| "https://api.payments.example".to_string()),
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok(),
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
