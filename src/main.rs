use actix_web::{App, HttpServer};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sales_engine::api::{self, AppState};
use sales_engine::config::AppConfig;
use sales_engine::domain::order::{PricingCalculator, TransactionCoordinator};
use sales_engine::metrics::Metrics;
use sales_engine::store::PgSalesStore;
use sales_engine::tracking::{RedisTrackingStore, TrackingSynchronizer};
use sales_engine::utils::{retry_with_backoff, BackoffPolicy};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Optional .env file; real environment variables win
    dotenv::dotenv().ok();

    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sales_engine=debug")),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(
        http_bind = %config.http_bind,
        tax_rate = %config.tax_rate,
        transaction_timeout_ms = config.transaction_timeout.as_millis() as u64,
        tracking_timeout_ms = config.tracking_timeout.as_millis() as u64,
        "Starting sales engine"
    );

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 2. Primary store (PostgreSQL), retried while the database comes up ===
    let store = retry_with_backoff(&BackoffPolicy::startup(), "postgres_connect", |_| {
        PgSalesStore::connect(
            &config.database_url,
            config.db_max_connections,
            config.transaction_timeout,
        )
    })
    .await?;
    store.ensure_schema().await?;

    // === 3. Tracking mirror (Redis), connected lazily behind a circuit breaker ===
    let redis = RedisTrackingStore::new(&config.redis_url, config.tracking_breaker.clone())?
        .with_metrics(metrics.clone());
    let tracking = TrackingSynchronizer::new(Arc::new(redis), config.tracking_timeout, metrics.clone());

    // === 4. Coordinator and HTTP surface ===
    let coordinator = TransactionCoordinator::new(
        Arc::new(store),
        PricingCalculator::new(config.tax_rate),
        tracking,
        metrics.clone(),
        config.transaction_timeout,
    );
    let state = AppState::new(coordinator, metrics);

    tracing::info!(bind = %config.http_bind, "HTTP server listening");
    HttpServer::new(move || App::new().configure(api::configure(state.clone())))
        .bind(&config.http_bind)?
        .run()
        .await?;

    tracing::info!("Sales engine stopped");
    Ok(())
}
