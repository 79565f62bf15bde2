//! Callbill server
//!
//! Meters calls placed against a tenant's bot, charges the tenant's prepaid
//! balance and streams live call events over WebSocket.

use actix_cors::Cors;
use actix_web::{http::header, middleware, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use callbill_api::{configure_health, configure_tenants, configure_ws};
use callbill_core::{
    config::{AppConfig, StorageBackend},
    models::Tenant,
    traits::{BalanceLedger, CallSettlement, CallStore, TenantDirectory},
};
use callbill_db::{
    create_pool, run_migrations, MemoryBalanceLedger, MemoryCallSettlement, MemoryCallStore,
    MemoryTenantDirectory, PgBalanceLedger, PgCallSettlement, PgCallStore, PgTenantDirectory,
};
use callbill_services::{CostCalculator, EventHub, SessionEngine};
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Storage collaborators handed to the engine
struct Stores {
    tenants: Arc<dyn TenantDirectory>,
    ledger: Arc<dyn BalanceLedger>,
    calls: Arc<dyn CallStore>,
    settlement: Arc<dyn CallSettlement>,
}

/// Configure API routes
fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(configure_health)
            .configure(configure_tenants),
    )
    // Live event streams
    .configure(configure_ws);
}

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "callbill={0},callbill_api={0},callbill_services={0},callbill_db={0},\
             actix_web=info,sqlx=warn",
            log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// Connect to PostgreSQL and apply migrations
async fn postgres_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    let url = config
        .database
        .url
        .as_deref()
        .context("database.url must be set for the postgres backend")?;

    info!("Connecting to database...");
    let pool = create_pool(url, Some(config.database.max_connections)).await?;
    run_migrations(&pool).await?;

    Ok(Stores {
        tenants: Arc::new(PgTenantDirectory::new(pool.clone())),
        ledger: Arc::new(PgBalanceLedger::new(pool.clone())),
        calls: Arc::new(PgCallStore::new(pool.clone())),
        settlement: Arc::new(PgCallSettlement::new(pool)),
    })
}

/// In-process stores provisioned from `seed.tenants`
fn memory_stores(config: &AppConfig) -> Stores {
    let tenants = MemoryTenantDirectory::new();
    let ledger = Arc::new(MemoryBalanceLedger::new());
    let calls = Arc::new(MemoryCallStore::new());

    for seed in &config.seed.tenants {
        let mut tenant = Tenant::new(seed.id, seed.name.clone(), seed.bot_id.clone());
        if let Some(bot_name) = &seed.bot_name {
            tenant = tenant.with_bot_name(bot_name.clone());
        }
        tenants.insert(tenant);
        ledger.open(seed.id, seed.balance_cents);
        info!(
            "Provisioned tenant {} ({}) with {} cents",
            seed.id, seed.name, seed.balance_cents
        );
    }

    if config.seed.tenants.is_empty() {
        warn!("Memory backend started without seed tenants; every request will 404");
    }

    Stores {
        tenants: Arc::new(tenants),
        settlement: Arc::new(MemoryCallSettlement::new(calls.clone(), ledger.clone())),
        ledger,
        calls,
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    init_tracing();

    info!("Starting Callbill v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("Failed to load configuration")?;

    let stores = match config.storage.backend {
        StorageBackend::Postgres => postgres_stores(&config).await?,
        StorageBackend::Memory => memory_stores(&config),
    };
    info!("Using {:?} storage backend", config.storage.backend);

    let hub = Arc::new(EventHub::new(config.events.channel_capacity));
    let engine = SessionEngine::new(
        stores.tenants,
        stores.ledger,
        stores.calls,
        stores.settlement,
        hub.clone(),
        CostCalculator::new(config.billing.rate_cents_per_minute),
    )
    .with_default_list_limit(config.billing.list_limit_default);

    info!(
        "Billing at {} cents per started minute",
        engine.calculator().rate_cents_per_minute()
    );

    let engine = web::Data::new(engine);
    let hub = web::Data::from(hub);
    let cors_origins = config.cors_origins();
    let bind_addr = config.server_addr();

    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, config.server.workers
    );

    HttpServer::new(move || {
        let origins = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _req_head| {
                origin
                    .to_str()
                    .map(|o| origins.iter().any(|allowed| allowed == o))
                    .unwrap_or(false)
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
            .max_age(3600);

        App::new()
            .app_data(engine.clone())
            .app_data(hub.clone())
            .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                let error_message = err.to_string();
                actix_web::error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().json(serde_json::json!({
                        "error": "invalid_query",
                        "message": error_message,
                        "status": 400,
                    })),
                )
                .into()
            }))
            // Middleware
            .wrap(cors)
            .wrap(middleware::Logger::new("%a \"%r\" %s %b %Dms"))
            .wrap(TracingLogger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(configure_routes)
    })
    .workers(config.server.workers)
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run()
    .await?;

    info!("Server stopped");
    Ok(())
}
