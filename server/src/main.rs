//! Raffle inventory HTTP server.
//!
//! Serves selection, purchase and reservation over HTTP and runs the expiry
//! reclaimer in the background.

use metrics_exporter_prometheus::PrometheusBuilder;
use raffle_inventory_core::environment::{Clock, SystemClock};
use raffle_inventory_engine::metrics::register_inventory_metrics;
use raffle_inventory_engine::{InventoryEngine, Reclaimer};
use raffle_inventory_postgres::PostgresInventoryStore;
use raffle_inventory_server::{Config, DatabaseReadiness, RedisStatsCache};
use raffle_inventory_web::{AppState, build_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,raffle_inventory=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting raffle inventory server");

    let config = Config::from_env();
    config.validate()?;
    info!(
        server = %format!("{}:{}", config.server.host, config.server.port),
        redis_enabled = config.redis.url.is_some(),
        reclaimer_interval_secs = config.reclaimer.interval,
        "Configuration loaded"
    );

    // Prometheus exporter
    let metrics_addr: SocketAddr =
        format!("{}:{}", config.server.metrics_host, config.server.metrics_port).parse()?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()?;
    register_inventory_metrics();
    info!(address = %metrics_addr, "Metrics exporter listening");

    // Store
    info!("Connecting to database...");
    let store =
        PostgresInventoryStore::connect(&config.database.url, config.database.max_connections)
            .await?;
    if config.database.run_migrations {
        store.migrate().await?;
        info!("Migrations applied");
    }

    // Engine
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut engine = InventoryEngine::new(Arc::new(store.clone()), clock, config.engine_config());
    if let Some(url) = &config.redis.url {
        match RedisStatsCache::connect(url).await {
            Ok(cache) => {
                engine = engine.with_stats_cache(Arc::new(cache));
                info!("Availability snapshot cache enabled");
            }
            Err(e) => warn!(error = %e, "Redis unavailable, running without snapshot cache"),
        }
    }
    let engine = Arc::new(engine);

    // Reclaimer
    let (reclaimer, reclaimer_shutdown) =
        Reclaimer::new(Arc::clone(&engine), config.reclaimer_config());
    let reclaimer_handle = tokio::spawn(async move { reclaimer.run().await });

    // HTTP
    let state = AppState::new(engine).with_readiness(Arc::new(DatabaseReadiness::new(store)));
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, stopping reclaimer...");
    if reclaimer_shutdown.send(true).is_err() {
        warn!("Reclaimer already stopped");
    }
    match tokio::time::timeout(config.shutdown_timeout(), reclaimer_handle).await {
        Ok(Ok(())) => info!("Reclaimer stopped"),
        Ok(Err(e)) => error!(error = %e, "Reclaimer task failed"),
        Err(_) => warn!(
            timeout_secs = config.server.shutdown_timeout,
            "Reclaimer did not stop in time"
        ),
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
