use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::server::protocol::{StatusResponse, VectorStoreStatus};
use crate::server::state::AppState;

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "ragchat API is running" }))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Reports backend reachability; a down vector store is reported, not raised.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let vector_store = match state.store.list_collections().await {
        Ok(collections) => VectorStoreStatus {
            driver: state.store.driver(),
            healthy: true,
            collections: collections.len(),
            error: None,
        },
        Err(e) => VectorStoreStatus {
            driver: state.store.driver(),
            healthy: false,
            collections: 0,
            error: Some(e.to_string()),
        },
    };

    Json(StatusResponse {
        vector_store,
        embedding_model: state.embedder.model_id().to_string(),
        embedding_dimension: state.embedder.dimension(),
        metrics: state.metrics_summary().await,
    })
}
