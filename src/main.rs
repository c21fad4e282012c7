//! callmeter server
//!
//! Prepaid credit ledger for metered voice sessions: event intake, credit
//! grants and balance queries over HTTP, with the expiry sweep and event
//! workers running alongside.

use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use callmeter_api::{configure_routes, AppState};
use callmeter_cache::{CachedTenantConfig, RedisCache, RedisKillSignalPublisher};
use callmeter_core::config::{AppConfig, LoggingConfig};
use callmeter_core::traits::{
    KillSignalSink, LedgerStore, ReservationRepository, TenantConfigProvider,
};
use callmeter_db::{
    create_pool, run_migrations, InMemoryLedgerStore, InMemoryReservationRepository,
    PgLedgerStore, PgReservationRepository,
};
use callmeter_services::constants::KILL_SIGNAL_BUFFER;
use callmeter_services::{
    run_workers, spawn_expiry_sweeper, ChannelKillSink, LedgerEngine, LoggingKillSink,
    StaticTenantConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing(logging: &LoggingConfig) {
    let level = &logging.level;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "callmeter={level},callmeter_api={level},callmeter_services={level},\
             callmeter_db={level},callmeter_cache={level},actix_web=info,sqlx=warn"
        ))
    });

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.json {
        registry.with(fmt::layer().json().with_current_span(true)).init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .init();
    }
}

async fn build_stores(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn LedgerStore>, Arc<dyn ReservationRepository>)> {
    let Some(url) = config.database.url.as_deref() else {
        warn!("No database URL configured, ledger is held in memory only");
        return Ok((
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryReservationRepository::new()),
        ));
    };

    info!("Connecting to database...");
    let pool = create_pool(url, &config.database)
        .await
        .context("failed to create database pool")?;
    if config.database.run_migrations {
        run_migrations(&pool)
            .await
            .context("failed to run migrations")?;
    }
    info!(
        max_connections = config.database.max_connections,
        "Database connection established"
    );

    Ok((
        Arc::new(PgLedgerStore::new(pool.clone())),
        Arc::new(PgReservationRepository::new(pool)),
    ))
}

async fn build_tenant_and_sink(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn TenantConfigProvider>, Arc<dyn KillSignalSink>)> {
    let tenants: Arc<dyn TenantConfigProvider> = Arc::new(StaticTenantConfig::from_config(config));

    let Some(url) = config.redis.url.as_deref() else {
        info!("No Redis URL configured, kill signals are logged only");
        let (sink, mut signals) = ChannelKillSink::channel(KILL_SIGNAL_BUFFER);
        tokio::spawn(async move {
            let log = LoggingKillSink;
            while let Some(signal) = signals.recv().await {
                if let Err(e) = log.send(signal).await {
                    warn!(error = %e, "Kill signal forwarding failed");
                }
            }
        });
        return Ok((tenants, Arc::new(sink)));
    };

    let cache = RedisCache::new(url)
        .await
        .context("failed to connect to Redis")?;
    cache.ping().await.context("Redis ping failed")?;
    info!("Redis client connected");

    Ok((
        Arc::new(CachedTenantConfig::new(
            tenants,
            cache.clone(),
            config.redis.profile_ttl_secs,
        )),
        Arc::new(RedisKillSignalPublisher::new(cache)),
    ))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config.logging);

    info!("Starting callmeter v{}", env!("CARGO_PKG_VERSION"));

    let (ledger, reservations) = build_stores(&config).await?;
    let (tenants, sink) = build_tenant_and_sink(&config).await?;
    let billing = &config.billing;
    let engine = LedgerEngine::new(ledger, reservations, tenants, sink, billing);

    let shutdown = CancellationToken::new();
    let sweeper = spawn_expiry_sweeper(
        engine.manager.clone(),
        Duration::from_secs(billing.sweep_interval_secs),
        shutdown.clone(),
    );

    let (events_tx, events_rx) = mpsc::channel(billing.event_queue_capacity.max(1));
    let workers = tokio::spawn(run_workers(
        engine.processor.clone(),
        events_rx,
        billing.event_workers,
    ));

    let state = AppState::new(engine).with_event_queue(events_tx);
    let bind_addr = config.server_addr();
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, config.server.workers
    );

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(TracingLogger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(configure_routes)
            // Root redirect to health
            .route(
                "/",
                web::get().to(|| async {
                    HttpResponse::Found()
                        .append_header(("Location", "/api/v1/health"))
                        .finish()
                }),
            )
    })
    .workers(config.server.workers.max(1))
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
    .run()
    .await?;

    info!("HTTP server stopped, draining background tasks");
    shutdown.cancel();
    sweeper.await.context("expiry sweeper panicked")?;
    match tokio::time::timeout(Duration::from_secs(30), workers).await {
        Ok(joined) => joined.context("event workers panicked")?,
        Err(_) => warn!("Event workers still busy after 30s, exiting anyway"),
    }

    Ok(())
}
