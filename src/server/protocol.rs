//! JSON bodies of the HTTP API.

use serde::{Deserialize, Serialize};

use crate::models::{
    ConversationTurn, Mode, Provider, RetrievalStatus, RetrievedChunk, VectorDriver,
};
use crate::services::MetricsSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub mode: Mode,
    /// Falls back to `chat.provider`.
    #[serde(default)]
    pub provider: Option<Provider>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub chat_history: Vec<ConversationTurn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub text: String,
    pub score: f32,
    pub source_id: String,
}

impl From<RetrievedChunk> for SourceRef {
    fn from(chunk: RetrievedChunk) -> Self {
        Self {
            text: chunk.text,
            score: chunk.score,
            source_id: chunk.source_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub retrieval: RetrievalStatus,
    pub provider: Provider,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCollectionRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    pub source_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddDocumentsRequest {
    pub documents: Vec<DocumentInput>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub chunk_overlap: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInput {
    pub text: String,
    pub source_id: String,
    pub offset: u64,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertChunksRequest {
    pub chunks: Vec<ChunkInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertChunksResponse {
    pub chunks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub vector_store: VectorStoreStatus,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreStatus {
    pub driver: VectorDriver,
    pub healthy: bool,
    pub collections: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error_kind: String,
    pub message: String,
}
