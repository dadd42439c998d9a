//! Registry import server - main entry point

use anyhow::{Context, Result};
use registry_common::logging::{init_logging, LogConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use registry_import::{
    api::{self, AppState},
    config::Config,
    db,
    ingest::{self, QueueService, ReclaimScheduler},
    notifications::{Broker, ChangeListener},
};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("registry-import-server")
        .filter_directives("registry_import=debug,tower_http=debug,sqlx=warn")
        .build()
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    info!("Starting registry import server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let pool = db::create_pool(&db::DbConfig::from(&config.database)).await?;
    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    info!("Database migrations completed");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let broker = Broker::new(
        config.notifications.outbox_capacity,
        config.notifications.max_failed_sends,
    );
    let mut tasks = vec![
        broker.start_heartbeat(config.notifications.heartbeat_interval(), shutdown_rx.clone()),
        ChangeListener::new(
            pool.clone(),
            broker.clone(),
            config.notifications.clone(),
            shutdown_rx.clone(),
        )
        .start(),
    ];

    let queue = QueueService::new(pool.clone());
    if config.worker.enabled {
        tasks.extend(ingest::spawn_workers(
            queue.clone(),
            config.analysis.clone(),
            config.worker.clone(),
            shutdown_rx.clone(),
        ));
        tasks.push(
            ReclaimScheduler::new(
                queue,
                config.worker.reclaim_interval(),
                config.worker.reclaim_timeout(),
                shutdown_rx.clone(),
            )
            .start(),
        );
        info!(workers = config.worker.workers, "Import workers started");
    } else {
        info!("Import workers are disabled (IMPORT_ENABLED=false)");
    }

    let app = api::create_router(AppState { db: pool, broker }, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, waiting for background tasks");
    let _ = shutdown_tx.send(true);

    let drain = futures::future::join_all(tasks);
    let timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    if tokio::time::timeout(timeout, drain).await.is_err() {
        tracing::warn!(
            timeout_secs = timeout.as_secs(),
            "Background tasks did not stop in time"
        );
    }

    info!("Server shut down gracefully");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
