//! Tally billing server
//!
//! Token-billing ledger: webhook ingestion from the payment provider, the
//! internal reservation ledger, and the background consistency jobs.

use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use std::sync::Arc;
use tally_api::{configure_balance, configure_packs, configure_webhooks};
use tally_core::clock::{SharedClock, SystemClock};
use tally_core::AppConfig;
use tally_db::{create_pool, init_schema, PackRepository};
use tally_services::catalog::PackSource;
use tally_services::{
    CheckoutValidator, ExpirySweeper, HttpProviderClient, LedgerService, MetricsSink,
    ProductCatalog, ProviderClient, ReconciliationJob, WebhookProcessor,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Health check endpoint
async fn health_check(metrics: web::Data<Arc<MetricsSink>>) -> HttpResponse {
    HttpResponse::Ok().json(tally_api::dto::HealthResponse {
        status: "healthy",
        service: "tally-billing",
        version: env!("CARGO_PKG_VERSION"),
        metrics: metrics.snapshot(),
    })
}

/// Initialize tracing/logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("tally_billing=info,tally_api=info,tally_services=info,tally_db=info,actix_web=info,sqlx=warn")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Tally billing server v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().unwrap_or_else(|e| {
        panic!("configuration error: {e}");
    });

    info!("Connecting to database...");
    let pool = create_pool(
        &config.database.url,
        Some(config.database.max_connections),
        Some(config.database.statement_timeout_ms),
    )
    .await
    .unwrap_or_else(|e| panic!("database unavailable: {e}"));

    init_schema(&pool)
        .await
        .unwrap_or_else(|e| panic!("schema bootstrap failed: {e}"));

    let clock: SharedClock = Arc::new(SystemClock);
    let metrics = Arc::new(MetricsSink::new());

    let ledger = Arc::new(LedgerService::new(
        pool.clone(),
        clock.clone(),
        config.billing.reservation_ttl_minutes,
    ));

    let provider: Arc<dyn ProviderClient> = Arc::new(HttpProviderClient::new(
        config.provider.api_base.clone(),
        config.provider.secret_key.clone(),
    ));

    let catalog = Arc::new(ProductCatalog::new(
        PackRepository::new(pool.clone()),
        config.provider.clone(),
    ));

    // Best-effort catalog sync at startup; the config fallback covers a miss
    match catalog.sync_from_provider(provider.as_ref()).await {
        Ok(count) => info!("synced {count} product packs"),
        Err(e) => warn!("startup catalog sync skipped: {e}"),
    }

    let validator = CheckoutValidator::new(
        catalog.clone() as Arc<dyn PackSource>,
        config.billing.strict_amount_validation,
    );

    let processor = Arc::new(WebhookProcessor::new(
        pool.clone(),
        ledger.clone(),
        validator,
        provider.clone(),
        metrics.clone(),
        clock.clone(),
        config.webhook.clone(),
        config.billing.refund_policy,
    ));

    // Background jobs
    let sweeper = Arc::new(ExpirySweeper::new(
        ledger.clone(),
        clock.clone(),
        metrics.clone(),
        config.billing.expiry_sweep_batch,
    ));
    sweeper.spawn(config.billing.expiry_sweep_interval_secs);

    let reconciler = Arc::new(ReconciliationJob::new(pool.clone(), metrics.clone()));
    reconciler.spawn(config.billing.reconciliation_interval_secs);

    let addr = config.server_addr();
    let workers = config.server.workers;
    info!("Listening on {addr} with {workers} workers");

    let ledger_data = web::Data::new(ledger);
    let catalog_data = web::Data::new(catalog);
    let processor_data = web::Data::new(processor);
    let metrics_data = web::Data::new(metrics);

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Compress::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .app_data(ledger_data.clone())
            .app_data(catalog_data.clone())
            .app_data(processor_data.clone())
            .app_data(metrics_data.clone())
            .route("/health", web::get().to(health_check))
            .configure(configure_webhooks)
            .configure(configure_balance)
            .configure(configure_packs)
    })
    .workers(workers)
    .bind(addr)?
    .run()
    .await
}
