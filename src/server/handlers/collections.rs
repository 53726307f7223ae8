use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use crate::models::{CollectionInfo, Document, DocumentChunk, is_valid_collection_name};
use crate::server::error::ApiError;
use crate::server::protocol::{
    AddDocumentsRequest, CreateCollectionRequest, InsertChunksRequest, InsertChunksResponse,
};
use crate::server::state::AppState;
use crate::services::{IngestStats, TextChunker};

fn checked_name(name: &str) -> Result<(), ApiError> {
    if is_valid_collection_name(name) {
        Ok(())
    } else {
        Err(ApiError::invalid_request(format!(
            "invalid collection name: {name}"
        )))
    }
}

pub async fn list_collections(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CollectionInfo>>, ApiError> {
    Ok(Json(state.store.list_collections().await?))
}

pub async fn create_collection(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateCollectionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CollectionInfo>), ApiError> {
    let Json(request) = payload?;
    let info = state.ingestor.create_collection(&request.name).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn get_collection(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<CollectionInfo>, ApiError> {
    checked_name(&name)?;
    state
        .store
        .collection_info(&name)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::collection_not_found(&name))
}

pub async fn delete_collection(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    checked_name(&name)?;
    state.store.delete_collection(&name).await?;
    tracing::info!(collection = %name, "deleted collection");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_documents(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    payload: Result<Json<AddDocumentsRequest>, JsonRejection>,
) -> Result<Json<IngestStats>, ApiError> {
    let Json(request) = payload?;
    let chunking = &state.config.chunking;
    let chunker = TextChunker::new(
        request.chunk_size.unwrap_or(chunking.chunk_size as usize),
        request.chunk_overlap.unwrap_or(chunking.chunk_overlap as usize),
    )?;

    let documents: Vec<Document> = request
        .documents
        .into_iter()
        .map(|d| Document::new(d.source_id, d.text))
        .collect();

    let stats = state
        .ingestor
        .ingest_documents(&name, &documents, &chunker)
        .await?;
    Ok(Json(stats))
}

pub async fn insert_chunks(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    payload: Result<Json<InsertChunksRequest>, JsonRejection>,
) -> Result<Json<InsertChunksResponse>, ApiError> {
    let Json(request) = payload?;
    let chunks = request
        .chunks
        .into_iter()
        .map(|c| {
            DocumentChunk::pre_embedded(
                c.source_id,
                c.text,
                c.offset,
                c.embedding,
                Some(c.embedding_model),
            )
        })
        .collect();

    let inserted = state.ingestor.insert_chunks(&name, chunks).await?;
    Ok(Json(InsertChunksResponse { chunks: inserted }))
}
