//! Error types for the RAG chat service.

use thiserror::Error;

use crate::utils::retry::Retryable;

/// Wire-level classification shared by every error that can reach a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    InvalidConfiguration,
    CollectionNotFound,
    CollectionExists,
    EmbeddingModelMismatch,
    EmbeddingUnavailable,
    RetrievalUnavailable,
    ProviderAuthError,
    ProviderRateLimited,
    ProviderUnavailable,
    ProviderTimeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::InvalidConfiguration => "invalid_configuration",
            ErrorKind::CollectionNotFound => "collection_not_found",
            ErrorKind::CollectionExists => "collection_exists",
            ErrorKind::EmbeddingModelMismatch => "embedding_model_mismatch",
            ErrorKind::EmbeddingUnavailable => "embedding_unavailable",
            ErrorKind::RetrievalUnavailable => "retrieval_unavailable",
            ErrorKind::ProviderAuthError => "provider_auth_error",
            ErrorKind::ProviderRateLimited => "provider_rate_limited",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::ProviderTimeout => "provider_timeout",
            ErrorKind::Internal => "internal",
        }
    }

    /// HTTP status code used when this kind is returned by the API.
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::InvalidRequest | ErrorKind::InvalidConfiguration => 400,
            ErrorKind::ProviderAuthError => 401,
            ErrorKind::CollectionNotFound => 404,
            ErrorKind::CollectionExists | ErrorKind::EmbeddingModelMismatch => 409,
            ErrorKind::ProviderRateLimited => 429,
            ErrorKind::Internal => 500,
            ErrorKind::ProviderUnavailable => 502,
            ErrorKind::EmbeddingUnavailable | ErrorKind::RetrievalUnavailable => 503,
            ErrorKind::ProviderTimeout => 504,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the document chunker.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error(
        "invalid chunking configuration: overlap ({overlap}) must be smaller than chunk size ({chunk_size})"
    )]
    InvalidConfiguration { chunk_size: usize, overlap: usize },
}

impl ChunkError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidConfiguration
    }
}

/// Errors related to loading and running a local embedding model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model not found: {0}")]
    NotFound(String),

    #[error("failed to load model: {0}")]
    LoadError(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),

    #[error("inference error: {0}")]
    InferenceError(String),
}

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding server: {0}")]
    ConnectionError(String),

    #[error("embedding server error: {0}")]
    ServerError(String),

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("local embedding model error: {0}")]
    Model(#[from] ModelError),

    #[error("embedding timeout")]
    Timeout,
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::ConnectionError(_) | EmbeddingError::Timeout => true,
            // 5xx and 429 from the server are usually transient
            EmbeddingError::ServerError(msg) => {
                msg.contains("503")
                    || msg.contains("502")
                    || msg.contains("504")
                    || msg.contains("429")
                    || msg.to_lowercase().contains("unavailable")
                    || msg.to_lowercase().contains("too many requests")
            }
            EmbeddingError::RequestError(e) => e.is_timeout() || e.is_connect(),
            EmbeddingError::InvalidResponse(_) | EmbeddingError::Model(_) => false,
        }
    }
}

/// Errors related to vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("failed to connect to vector store: {0}")]
    ConnectionError(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("collection already exists: {0}")]
    CollectionExists(String),

    #[error("collection error: {0}")]
    CollectionError(String),

    #[error("upsert error: {0}")]
    UpsertError(String),

    #[error("search error: {0}")]
    SearchError(String),

    #[error("delete error: {0}")]
    DeleteError(String),

    #[error("PostgreSQL error: {0}")]
    PostgresError(String),

    #[error("pgvector extension error: {0}")]
    PgVectorExtensionError(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: u64, actual: u64 },

    #[error("vector store timeout")]
    Timeout,
}

impl Retryable for VectorStoreError {
    fn is_retryable(&self) -> bool {
        match self {
            VectorStoreError::ConnectionError(_) | VectorStoreError::Timeout => true,
            VectorStoreError::CollectionError(msg)
            | VectorStoreError::UpsertError(msg)
            | VectorStoreError::SearchError(msg)
            | VectorStoreError::DeleteError(msg)
            | VectorStoreError::PostgresError(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("timeout")
                    || msg_lower.contains("connection")
                    || msg_lower.contains("unavailable")
                    || msg_lower.contains("too many")
            }
            VectorStoreError::CollectionNotFound(_)
            | VectorStoreError::CollectionExists(_)
            | VectorStoreError::PgVectorExtensionError(_)
            | VectorStoreError::DimensionMismatch { .. } => false,
        }
    }
}

/// Errors returned by an LLM provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} rejected the API key: {message}")]
    Auth { provider: String, message: String },

    #[error("{provider} rate limit or quota exceeded: {message}")]
    RateLimited { provider: String, message: String },

    #[error("{provider} is unavailable: {message}")]
    Unavailable { provider: String, message: String },

    #[error("{provider} did not respond within {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Auth { .. } => ErrorKind::ProviderAuthError,
            ProviderError::RateLimited { .. } => ErrorKind::ProviderRateLimited,
            ProviderError::Unavailable { .. } => ErrorKind::ProviderUnavailable,
            ProviderError::Timeout { .. } => ErrorKind::ProviderTimeout,
        }
    }
}

/// Errors produced while preparing a query for the LLM.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query cannot be empty")]
    InvalidQuery,

    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(#[source] EmbeddingError),

    #[error("vector store unavailable: {0}")]
    RetrievalUnavailable(#[source] VectorStoreError),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error(
        "collection '{collection}' was built with embedding model '{expected}', but queries use '{actual}'"
    )]
    EmbeddingModelMismatch {
        collection: String,
        expected: String,
        actual: String,
    },
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::InvalidQuery => ErrorKind::InvalidRequest,
            QueryError::EmbeddingUnavailable(_) => ErrorKind::EmbeddingUnavailable,
            QueryError::RetrievalUnavailable(_) => ErrorKind::RetrievalUnavailable,
            QueryError::CollectionNotFound(_) => ErrorKind::CollectionNotFound,
            QueryError::EmbeddingModelMismatch { .. } => ErrorKind::EmbeddingModelMismatch,
        }
    }
}

/// Errors related to building and filling collections.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid collection name: {0}")]
    InvalidCollectionName(String),

    #[error("chunking error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error(
        "collection '{collection}' was built with embedding model '{expected}', refusing chunks from '{actual}'"
    )]
    EmbeddingModelMismatch {
        collection: String,
        expected: String,
        actual: String,
    },

    #[error("chunk {0} has no embedding")]
    MissingEmbedding(String),

    #[error("chunk {0} does not name its embedding model")]
    MissingEmbeddingModel(String),

    #[error("file read error: {0}")]
    FileReadError(String),

    #[error("no files found")]
    NoFilesFound,
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::InvalidCollectionName(_)
            | IngestError::MissingEmbedding(_)
            | IngestError::MissingEmbeddingModel(_)
            | IngestError::FileReadError(_)
            | IngestError::NoFilesFound => ErrorKind::InvalidRequest,
            IngestError::Chunk(e) => e.kind(),
            IngestError::Embedding(_) => ErrorKind::EmbeddingUnavailable,
            IngestError::VectorStore(e) => vector_store_kind(e),
            IngestError::EmbeddingModelMismatch { .. } => ErrorKind::EmbeddingModelMismatch,
        }
    }
}

/// Map a vector store error to its wire kind.
pub fn vector_store_kind(error: &VectorStoreError) -> ErrorKind {
    match error {
        VectorStoreError::CollectionNotFound(_) => ErrorKind::CollectionNotFound,
        VectorStoreError::CollectionExists(_) => ErrorKind::CollectionExists,
        VectorStoreError::DimensionMismatch { .. } => ErrorKind::EmbeddingModelMismatch,
        _ => ErrorKind::RetrievalUnavailable,
    }
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Application-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("query error: {0}")]
    Query(#[from] QueryError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Config(_) => ErrorKind::InvalidConfiguration,
            AppError::Query(e) => e.kind(),
            AppError::Provider(e) => e.kind(),
            AppError::Ingest(e) => e.kind(),
            AppError::Embedding(_) => ErrorKind::EmbeddingUnavailable,
            AppError::VectorStore(e) => vector_store_kind(e),
            AppError::Other(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_wire_names() {
        assert_eq!(ErrorKind::RetrievalUnavailable.as_str(), "retrieval_unavailable");
        assert_eq!(ErrorKind::ProviderAuthError.as_str(), "provider_auth_error");
        assert_eq!(ErrorKind::ProviderTimeout.to_string(), "provider_timeout");
    }

    #[test]
    fn test_error_kind_status() {
        assert_eq!(ErrorKind::InvalidRequest.status(), 400);
        assert_eq!(ErrorKind::ProviderAuthError.status(), 401);
        assert_eq!(ErrorKind::ProviderRateLimited.status(), 429);
        assert_eq!(ErrorKind::RetrievalUnavailable.status(), 503);
        assert_eq!(ErrorKind::ProviderTimeout.status(), 504);
    }

    #[test]
    fn test_query_error_kinds() {
        let err = QueryError::RetrievalUnavailable(VectorStoreError::ConnectionError(
            "refused".to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::RetrievalUnavailable);
        assert_eq!(QueryError::InvalidQuery.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_vector_store_retryable() {
        assert!(VectorStoreError::ConnectionError("x".into()).is_retryable());
        assert!(!VectorStoreError::CollectionNotFound("docs".into()).is_retryable());
        assert!(VectorStoreError::SearchError("connection reset".into()).is_retryable());
    }

    #[test]
    fn test_embedding_retryable() {
        assert!(EmbeddingError::Timeout.is_retryable());
        assert!(EmbeddingError::ServerError("status 503: busy".into()).is_retryable());
        assert!(!EmbeddingError::InvalidResponse("bad".into()).is_retryable());
    }
}
