use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use dm_realtime_service::config::Settings;
use dm_realtime_service::media::LocalMediaStore;
use dm_realtime_service::postgres::PostgresPool;
use dm_realtime_service::server::{create_app, AppState};
use dm_realtime_service::shutdown::{GracefulShutdown, ShutdownConfig};
use dm_realtime_service::storage::create_storage;
use dm_realtime_service::tasks::HeartbeatTask;
use dm_realtime_service::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;

    let _telemetry = init_telemetry(&settings.otel, &settings.logging)?;
    tracing::info!("Configuration loaded");

    let postgres_pool = if settings.storage.backend == "postgres" {
        match PostgresPool::new(&settings.storage).await {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                return Err(e.into());
            }
        }
    } else {
        None
    };

    let storage = create_storage(&settings.storage, postgres_pool.as_ref()).await?;
    let media = Arc::new(LocalMediaStore::new(&settings.media));
    tokio::fs::create_dir_all(media.root()).await?;

    let state = AppState::new(settings.clone(), storage, media, postgres_pool.clone());
    tracing::info!(
        storage = state.storage.backend,
        guard_stale_disconnect = settings.presence.guard_stale_disconnect,
        "Application state initialized"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let heartbeat_task = HeartbeatTask::new(
        settings.websocket.clone(),
        state.channels.clone(),
        shutdown_tx.subscribe(),
    );
    let heartbeat_handle = tokio::spawn(heartbeat_task.run());

    let shutdown = GracefulShutdown::new(
        state.channels.clone(),
        state.lifecycle.clone(),
        shutdown_tx,
        ShutdownConfig::from_presence(&settings.presence),
    );

    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            shutdown.execute("server shutting down").await;
        })
        .await?;

    tracing::info!("Waiting for background tasks to finish...");
    let _ = heartbeat_handle.await;

    if let Some(pool) = postgres_pool {
        pool.close().await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
