//! cellwatch -- Edge anomaly detection for cell sensor nodes.
//!
//! This crate provides the core library for per-device sensor windows,
//! feature extraction, anomaly scoring with a model fallback chain, and
//! alert persistence and fan-out.

pub mod api;
pub mod config;
pub mod detect;
pub mod features;
pub mod ingest;
pub mod pipeline;
pub mod publish;
pub mod scoring;
pub mod storage;
pub mod window;

use std::time::Duration;

use anyhow::Result;

use crate::config::CellwatchConfig;

/// Start the cellwatch daemon: scoring pipeline and ingest API.
pub async fn serve(config: CellwatchConfig) -> Result<()> {
    config.validate()?;

    // 1. Load models and open sinks
    let pipeline = pipeline::Pipeline::from_config(&config)?;

    // 2. Build API state
    let state = api::state::AppState::new(
        pipeline,
        &config.server.api_key,
        Duration::from_secs(config.server.request_timeout_secs),
    );
    let app = api::router(state);

    // 3. Start API Server
    let addr: std::net::SocketAddr = config.server.bind.parse()?;
    tracing::info!(%addr, "cellwatch listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("cellwatch shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
