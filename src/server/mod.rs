//! HTTP API over the retrieval orchestrator, LLM gateway, and collection management.

mod error;
mod handlers;
pub mod protocol;
mod router;
mod state;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;

use crate::error::AppError;
use crate::models::Config;
use crate::services::{LlmGateway, MetricsStore, create_backend, create_embedder};

pub use error::ApiError;
pub use router::router;
pub use state::AppState;

/// Connect the configured backends. Fails fast on unusable configuration.
pub async fn build_state(config: Config) -> Result<AppState, AppError> {
    let embedder = create_embedder(&config.embedding)?;
    let store = create_backend(&config.vector_store).await?;
    let gateway = LlmGateway::from_config(&config.providers)?;

    if let Err(e) = embedder.health_check().await {
        tracing::warn!(error = %e, "embedding backend is not reachable yet");
    }
    if let Err(e) = store.health_check().await {
        tracing::warn!(error = %e, driver = %store.driver(), "vector store is not reachable yet");
    }

    let metrics = open_metrics(&config);
    let mut state = AppState::new(config, embedder, store, gateway);
    if let Some(metrics) = metrics {
        state = state.with_metrics(metrics);
    }
    Ok(state)
}

fn open_metrics(config: &Config) -> Option<MetricsStore> {
    if !config.metrics.enabled {
        return None;
    }
    let path = Config::metrics_db_path()?;
    if let Some(parent) = path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        tracing::warn!(error = %e, "cannot create data directory, metrics disabled");
        return None;
    }
    match MetricsStore::open(&path) {
        Ok(store) => {
            let removed = store.cleanup(config.metrics.retention_days);
            tracing::info!(
                path = %path.display(),
                retention_days = config.metrics.retention_days,
                removed,
                "metrics enabled"
            );
            Some(store)
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to open metrics database");
            None
        }
    }
}

/// Serve until SIGINT or SIGTERM, letting in-flight requests finish.
pub async fn serve(state: AppState, address: &str) -> Result<(), AppError> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|e| AppError::Other(format!("cannot bind {address}: {e}")))?;
    tracing::info!(address, "listening");

    axum::serve(listener, router(Arc::new(state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Other(format!("server error: {e}")))?;

    tracing::info!("server stopped");
    Ok(())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
