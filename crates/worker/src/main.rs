use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use boxoffice_core::clock::{Clock, SystemClock};
use boxoffice_core::config::ReservationConfig;
use boxoffice_core::gateway::InventoryGateway;
use boxoffice_core::order_machine::OrderStateMachine;
use boxoffice_core::reclaimer::ExpiryReclaimer;
use boxoffice_db::PgInventoryGateway;

const DEFAULT_MAX_CONNECTIONS: u32 = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let fmt_layer = if std::env::var("LOG_FORMAT").is_ok_and(|v| v == "json") {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "boxoffice_worker=debug,boxoffice_core=info,boxoffice_db=info".into()
            }),
        )
        .with(fmt_layer)
        .init();

    // --- Configuration ---
    let config = ReservationConfig::from_env().context("Invalid reservation configuration")?;
    tracing::info!(
        hold_ttl_secs = config.hold_ttl.num_seconds(),
        max_hold_extension_secs = config.max_hold_extension.num_seconds(),
        reclaim_interval_secs = config.reclaim_interval.as_secs(),
        reclaim_batch_size = config.reclaim_batch_size,
        "Loaded reservation configuration"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("DATABASE_MAX_CONNECTIONS must be an integer, got '{raw}'"))?,
        Err(_) => DEFAULT_MAX_CONNECTIONS,
    };

    let pool = boxoffice_db::create_pool(&database_url, max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!(max_connections, "Database connection pool created");

    boxoffice_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    boxoffice_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Services ---
    let gateway: Arc<dyn InventoryGateway> = Arc::new(PgInventoryGateway::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let orders = Arc::new(OrderStateMachine::new(gateway, clock, &config));

    // Spawn the expiry reclaimer.
    let reclaim_cancel = CancellationToken::new();
    let reclaimer = ExpiryReclaimer::new(Arc::clone(&orders), &config);
    let reclaim_cancel_clone = reclaim_cancel.clone();
    let reclaim_handle = tokio::spawn(async move {
        reclaimer.run(reclaim_cancel_clone).await;
    });
    tracing::info!("Expiry reclaimer started");

    shutdown_signal().await;

    // --- Shutdown ---
    reclaim_cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(5), reclaim_handle)
        .await
        .is_err()
    {
        tracing::warn!("Expiry reclaimer did not stop within 5s");
    } else {
        tracing::info!("Expiry reclaimer stopped");
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
