mod collection;
mod config;
mod document;
mod query;

pub use collection::{CollectionInfo, CollectionSpec, is_valid_collection_name};
pub use config::{
    ChatConfig, ChunkingConfig, Config, DEFAULT_COLLECTION, DEFAULT_EMBEDDING_DIMENSION,
    DEFAULT_EMBEDDING_MODEL, DEFAULT_METRICS_RETENTION_DAYS, DEFAULT_QDRANT_URL,
    DEFAULT_SYSTEM_MESSAGE, EmbeddingBackend, EmbeddingConfig, LoggingConfig, MetricsConfig,
    Pooling, ProviderEndpoint, ProvidersConfig, RetrievalConfig, ServerConfig, VectorDriver,
    VectorStoreConfig,
};
pub use document::{Document, DocumentChunk};
pub use query::{
    ConversationTurn, Mode, OutputFormat, Prompt, Provider, QueryContext, RetrievalResult,
    RetrievalScope, RetrievalStatus, RetrievedChunk, Role,
};
