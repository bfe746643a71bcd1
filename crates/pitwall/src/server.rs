//! Listener setup and graceful shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use pitconf::PitwallConfig;
use telemdb::TelemetryDb;

use crate::ingest::CommandParser;
use crate::service::LapService;
use crate::web::{router, AppState};

/// Build the application state from config.
pub fn app_state(config: &PitwallConfig) -> Result<AppState> {
    let database = config.paths.database_path();
    let db = TelemetryDb::open(&database)
        .with_context(|| format!("Failed to open database at {}", database.display()))?;
    info!("Database: {}", database.display());

    let parser = CommandParser::from_config(&config.ingest);
    info!(
        "Recording parser: {} (timeout {}s)",
        config.ingest.program, config.ingest.timeout_secs
    );

    Ok(AppState::new(
        LapService::new(Arc::new(db)),
        Arc::new(parser),
    ))
}

/// Serve until Ctrl-C or SIGTERM.
pub async fn run(config: PitwallConfig) -> Result<()> {
    let state = app_state(&config)?;
    let app = router(state);

    let addr = config.bind.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Pitwall listening on http://{}", addr);
    info!("   Sessions: GET http://{}/api/sessions", addr);
    info!("   Upload: POST http://{}/api/telemetry/upload", addr);
    info!("   Health: GET http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
