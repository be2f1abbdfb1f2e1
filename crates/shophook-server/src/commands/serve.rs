//! `shophookd run`: HTTP server plus drain worker.

use anyhow::{Context, Result};
use shophook_core::db::{create_pool, run_migrations};
use shophook_server::{AppState, DrainWorker, OpsAuthConfig, ServerConfig, routes, start_drain_worker};
use tower_http::trace::TraceLayer;

pub async fn run(config: ServerConfig) -> Result<()> {
    let db = create_pool(&config.database_url)
        .await
        .context("Failed to open database")?;
    run_migrations(&db).await.context("Failed to run migrations")?;

    let ops_auth_config = OpsAuthConfig::from_env();
    if !ops_auth_config.is_configured() {
        tracing::warn!("SHOPHOOK_OPS_TOKEN not set, ops endpoints are disabled");
    }

    let bind_addr = config.bind_addr;
    let drain_config = config.drain.clone();
    let state = AppState::with_sqlite(db, config, ops_auth_config);

    let worker = DrainWorker::new(state.jobs.clone(), state.router.clone(), drain_config);
    let worker_handle = start_drain_worker(worker);

    let app = routes::app(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("Shophook server listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Waiting for drain worker to stop");
    worker_handle
        .shutdown()
        .await
        .context("Drain worker panicked")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
