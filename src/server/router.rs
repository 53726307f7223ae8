use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{collections, health, query};
use crate::server::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/status", get(health::status))
        .route("/query_llm", post(query::query_llm))
        .route(
            "/collections",
            get(collections::list_collections).post(collections::create_collection),
        )
        .route(
            "/collections/{name}",
            get(collections::get_collection).delete(collections::delete_collection),
        )
        .route(
            "/collections/{name}/documents",
            post(collections::add_documents),
        )
        .route("/collections/{name}/chunks", post(collections::insert_chunks))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
