use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bookpay::clearing;
use bookpay::config::Config;
use bookpay::db::{create_pool, init_db, queries, AppState};
use bookpay::handlers;
use bookpay::models::{CreateListing, CreateProfile};
use bookpay::payments::PaymentGateway;
use bookpay::split::RateTable;
use bookpay::token::TokenService;

#[derive(Parser, Debug)]
#[command(name = "bookpay")]
#[command(about = "Booking payment, referral attribution, and commission distribution engine")]
struct Cli {
    /// Seed the database with dev data (profiles and a listing)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with dev data for manual testing.
/// Creates a provider, a referrer, a customer, and one listing.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    if queries::get_profile_by_referral_code(&conn, "PROVIDER1")
        .expect("Failed to check seed data")
        .is_some()
    {
        tracing::info!("Database already has data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let provider = queries::create_profile(
        &conn,
        &CreateProfile {
            display_name: "Dev Provider".to_string(),
            referral_code: "PROVIDER1".to_string(),
        },
    )
    .expect("Failed to create dev provider");
    tracing::info!("Provider: {} ({})", provider.display_name, provider.id);

    let referrer = queries::create_profile(
        &conn,
        &CreateProfile {
            display_name: "Dev Referrer".to_string(),
            referral_code: "REFER123".to_string(),
        },
    )
    .expect("Failed to create dev referrer");
    tracing::info!("Referrer: {} ({})", referrer.display_name, referrer.id);

    let customer = queries::create_profile(
        &conn,
        &CreateProfile {
            display_name: "Dev Customer".to_string(),
            referral_code: "CUST4567".to_string(),
        },
    )
    .expect("Failed to create dev customer");
    tracing::info!("Customer: {} ({})", customer.display_name, customer.id);

    let listing = queries::create_listing(
        &conn,
        &CreateListing {
            provider_id: provider.id.clone(),
            title: "One-hour session".to_string(),
            price_minor: 10_000,
            currency: "gbp".to_string(),
            terms: Some("48h cancellation notice".to_string()),
        },
    )
    .expect("Failed to create dev listing");
    tracing::info!("Listing: {} ({})", listing.title, listing.id);
    tracing::info!("============================================");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookpay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");

    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let state = AppState {
        db: db_pool,
        tokens: TokenService::new(
            &config.token_secret,
            config.token_secret_previous.as_deref(),
            config.token_ttl_secs,
        ),
        webhook_secret: config.webhook_secret.clone(),
        rates: RateTable::default(),
        clearing_period_secs: config.clearing_period_secs,
        reservation_ttl_secs: config.reservation_ttl_secs,
        gateway: PaymentGateway::new(&config.processor_api_url),
        http_client: reqwest::Client::new(),
        notify_webhook_url: config.notify_webhook_url.clone(),
        base_url: config.base_url.clone(),
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set BOOKPAY_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    // The clearing sweep is the only writer that advances pending_clearing
    // entries; request handlers never do.
    clearing::spawn_sweep_task(state.clone(), config.sweep_interval_secs);

    let app = handlers::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Bookpay server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
