use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;

use crate::models::{QueryContext, RetrievalScope, is_valid_collection_name};
use crate::server::error::ApiError;
use crate::server::protocol::{QueryRequest, QueryResponse, SourceRef};
use crate::server::state::AppState;
use crate::services::CompletionRequest;

pub async fn query_llm(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = payload?;
    let started = Instant::now();
    let provider = request.provider.unwrap_or(state.config.chat.provider);
    let mode = request.mode;

    let result = answer(&state, request, started).await;

    state
        .record_request(
            provider,
            mode,
            started.elapsed(),
            result.as_ref().err().map(|e| e.kind.as_str()),
        )
        .await;
    match &result {
        Ok(response) => tracing::info!(
            provider = %provider,
            mode = %mode,
            retrieval = %response.retrieval,
            sources = response.sources.len(),
            latency_ms = response.latency_ms,
            "answered query"
        ),
        Err(e) => tracing::info!(provider = %provider, mode = %mode, error_kind = %e.kind, "query failed"),
    }
    result.map(Json)
}

async fn answer(
    state: &AppState,
    request: QueryRequest,
    started: Instant,
) -> Result<QueryResponse, ApiError> {
    let chat = &state.config.chat;
    let provider = request.provider.unwrap_or(chat.provider);

    if request.api_key.trim().is_empty() {
        return Err(ApiError::invalid_request("api_key is required"));
    }

    let temperature = request.temperature.unwrap_or(chat.temperature);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(ApiError::invalid_request(format!(
            "temperature must be between 0.0 and 2.0, got {temperature}"
        )));
    }
    let max_tokens = request.max_tokens.unwrap_or(chat.max_tokens);
    if max_tokens == 0 {
        return Err(ApiError::invalid_request("max_tokens must be at least 1"));
    }

    let collection = request
        .collection
        .unwrap_or_else(|| state.config.vector_store.default_collection.clone());
    if !is_valid_collection_name(&collection) {
        return Err(ApiError::invalid_request(format!(
            "invalid collection name: {collection}"
        )));
    }

    let mut system_message = request
        .system_message
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| chat.system_message.clone());
    if let Some(instruction) = chat.safety_instruction.as_deref() {
        system_message = format!("{system_message}\n\n{instruction}");
    }

    let ctx = QueryContext {
        raw_query: request.query,
        mode: request.mode,
        system_message,
        temperature,
        max_tokens,
    };
    let scope = RetrievalScope::new(collection, &state.config.retrieval);

    let (prompt, retrieval) = state.orchestrator.handle_query(&ctx, &scope).await?;

    let completion = CompletionRequest::new(request.api_key, &prompt, temperature, max_tokens)
        .with_history(request.chat_history);
    let answer = state.gateway.complete(provider, &completion).await?;

    Ok(QueryResponse {
        answer,
        sources: retrieval.chunks.into_iter().map(SourceRef::from).collect(),
        retrieval: retrieval.status,
        provider,
        latency_ms: started.elapsed().as_millis() as u64,
    })
}
