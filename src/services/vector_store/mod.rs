//! Vector store abstraction layer.
//!
//! Collections are named and carry their own dimension and embedding model, so
//! one backend instance serves every collection. Qdrant and PostgreSQL/pgvector
//! are the production drivers; the in-memory driver exists for development and
//! tests.

mod memory;
mod pgvector;
mod qdrant;

pub use memory::InMemoryVectorStore;
pub use pgvector::PgVectorBackend;
pub use qdrant::QdrantBackend;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::VectorStoreError;
use crate::models::{
    CollectionInfo, CollectionSpec, DocumentChunk, RetrievedChunk, VectorDriver, VectorStoreConfig,
};

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn driver(&self) -> VectorDriver;

    async fn health_check(&self) -> Result<bool, VectorStoreError>;

    /// Fails with `CollectionExists` when the name is taken.
    async fn create_collection(
        &self,
        spec: &CollectionSpec,
    ) -> Result<CollectionInfo, VectorStoreError>;

    /// Fails with `CollectionNotFound` when there is nothing to delete.
    async fn delete_collection(&self, name: &str) -> Result<(), VectorStoreError>;

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, VectorStoreError>;

    /// `None` when the collection does not exist.
    async fn collection_info(&self, name: &str)
    -> Result<Option<CollectionInfo>, VectorStoreError>;

    /// Insert chunks, replacing any with the same id. Every chunk must carry an embedding.
    async fn upsert(
        &self,
        collection: &str,
        chunks: Vec<DocumentChunk>,
    ) -> Result<(), VectorStoreError>;

    /// Remove every chunk belonging to the given documents.
    async fn delete_by_document_ids(
        &self,
        collection: &str,
        document_ids: &[String],
    ) -> Result<(), VectorStoreError>;

    /// Nearest neighbours by cosine similarity, most similar first. Equal scores
    /// keep insertion order.
    async fn search(
        &self,
        collection: &str,
        query_vector: Vec<f32>,
        limit: u64,
        min_score: Option<f32>,
    ) -> Result<Vec<RetrievedChunk>, VectorStoreError>;
}

pub async fn create_backend(
    config: &VectorStoreConfig,
) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
    tracing::debug!(driver = %config.driver, url = %config.url, "creating vector store backend");
    match config.driver {
        VectorDriver::Qdrant => Ok(Arc::new(QdrantBackend::new(config)?)),
        VectorDriver::PostgreSQL => Ok(Arc::new(PgVectorBackend::new(config).await?)),
        VectorDriver::Memory => Ok(Arc::new(InMemoryVectorStore::new())),
    }
}

/// Order hits by score, breaking ties by insertion sequence.
pub(crate) fn rank(hits: &mut [RetrievedChunk]) {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
}

/// Pull the embedding out of a chunk, checking its dimension.
pub(crate) fn take_embedding(
    chunk: &mut DocumentChunk,
    dimension: Option<u64>,
) -> Result<Vec<f32>, VectorStoreError> {
    let embedding = chunk.embedding.take().ok_or_else(|| {
        VectorStoreError::UpsertError(format!("chunk {} has no embedding", chunk.id))
    })?;

    if let Some(expected) = dimension
        && embedding.len() as u64 != expected
    {
        return Err(VectorStoreError::DimensionMismatch {
            expected,
            actual: embedding.len() as u64,
        });
    }

    Ok(embedding)
}
