mod chunker;
pub mod embedding;
mod ingest;
pub mod llm;
mod metrics;
mod orchestrator;
pub mod vector_store;

pub use chunker::{TextChunker, Window, Windows};
pub use embedding::{EmbeddingProvider, create_embedder};
pub use ingest::{IngestStats, Ingestor};
pub use llm::{CompletionRequest, LlmGateway, LlmProvider};
pub use metrics::{MetricsStore, MetricsSummary, ProviderCount, RequestRecord};
pub use orchestrator::{RetrievalOrchestrator, build_context_prompt, general_prompt};
pub use vector_store::{VectorStore, create_backend};
