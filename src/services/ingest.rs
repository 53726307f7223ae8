//! Collection building: chunk, embed, store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, VectorStoreError};
use crate::models::{
    CollectionInfo, CollectionSpec, Document, DocumentChunk, is_valid_collection_name,
};
use crate::services::TextChunker;
use crate::services::embedding::EmbeddingProvider;
use crate::services::vector_store::VectorStore;
use crate::utils::{RetryConfig, has_content, with_retry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub documents: u64,
    pub chunks: u64,
}

pub struct Ingestor {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    batch_size: usize,
    retry: RetryConfig,
}

impl Ingestor {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            batch_size: 32,
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Create an empty collection sized for the configured embedding model.
    pub async fn create_collection(&self, name: &str) -> Result<CollectionInfo, IngestError> {
        validate_name(name)?;
        let spec = CollectionSpec {
            name: name.to_string(),
            dimension: self.embedder.dimension() as u64,
            embedding_model: self.embedder.model_id().to_string(),
        };
        let info = self.store.create_collection(&spec).await?;
        tracing::info!(collection = name, dimension = spec.dimension, model = %spec.embedding_model, "created collection");
        Ok(info)
    }

    pub async fn ingest_documents(
        &self,
        collection: &str,
        documents: &[Document],
        chunker: &TextChunker,
    ) -> Result<IngestStats, IngestError> {
        self.ingest_with_progress(collection, documents, chunker, |_| {})
            .await
    }

    /// Like [`Ingestor::ingest_documents`], calling `on_batch` with the number
    /// of chunks stored after every batch.
    pub async fn ingest_with_progress<F>(
        &self,
        collection: &str,
        documents: &[Document],
        chunker: &TextChunker,
        mut on_batch: F,
    ) -> Result<IngestStats, IngestError>
    where
        F: FnMut(usize),
    {
        self.check_target(collection, Some(self.embedder.model_id()))
            .await?;

        // Chunk ids are positional; clear each document before writing its new chunks.
        let mut document_ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
        document_ids.sort();
        document_ids.dedup();
        with_retry(&self.retry, || {
            self.store
                .delete_by_document_ids(collection, &document_ids)
        })
        .await
        .into_result()?;

        let chunks: Vec<DocumentChunk> = documents
            .iter()
            .flat_map(|doc| chunker.chunks(doc))
            .filter(|chunk| has_content(&chunk.text))
            .collect();

        let mut stats = IngestStats {
            documents: documents.len() as u64,
            chunks: 0,
        };

        for batch in chunks.chunks(self.batch_size) {
            let stored = self.process_batch(collection, batch.to_vec()).await?;
            stats.chunks += stored as u64;
            on_batch(stored);
        }

        tracing::info!(
            collection,
            documents = stats.documents,
            chunks = stats.chunks,
            "ingested documents"
        );
        Ok(stats)
    }

    /// Store chunks whose embeddings were computed elsewhere.
    pub async fn insert_chunks(
        &self,
        collection: &str,
        chunks: Vec<DocumentChunk>,
    ) -> Result<u64, IngestError> {
        let info = self.check_target(collection, None).await?;

        for chunk in &chunks {
            let embedding = chunk
                .embedding
                .as_ref()
                .ok_or_else(|| IngestError::MissingEmbedding(chunk.id.clone()))?;
            if let Some(expected) = info.dimension
                && embedding.len() as u64 != expected
            {
                return Err(VectorStoreError::DimensionMismatch {
                    expected,
                    actual: embedding.len() as u64,
                }
                .into());
            }
            let actual = chunk
                .embedding_model
                .as_deref()
                .ok_or_else(|| IngestError::MissingEmbeddingModel(chunk.id.clone()))?;
            if let Some(expected) = info.embedding_model.as_deref()
                && expected != actual
            {
                return Err(IngestError::EmbeddingModelMismatch {
                    collection: collection.to_string(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        let count = chunks.len() as u64;
        for batch in chunks.chunks(self.batch_size) {
            self.upsert(collection, batch.to_vec()).await?;
        }
        tracing::info!(collection, chunks = count, "inserted pre-embedded chunks");
        Ok(count)
    }

    /// The collection must exist and, when both sides name a model, agree on it.
    async fn check_target(
        &self,
        collection: &str,
        model: Option<&str>,
    ) -> Result<CollectionInfo, IngestError> {
        validate_name(collection)?;
        let info = self
            .store
            .collection_info(collection)
            .await?
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?;

        if let (Some(expected), Some(actual)) = (info.embedding_model.as_deref(), model)
            && expected != actual
        {
            return Err(IngestError::EmbeddingModelMismatch {
                collection: collection.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(info)
    }

    async fn process_batch(
        &self,
        collection: &str,
        chunks: Vec<DocumentChunk>,
    ) -> Result<usize, IngestError> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let embeddings = with_retry(&self.retry, || self.embedder.embed_documents(texts.clone()))
            .await
            .into_result()?;

        if embeddings.len() != chunks.len() {
            return Err(IngestError::Embedding(
                crate::error::EmbeddingError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    chunks.len(),
                    embeddings.len()
                )),
            ));
        }

        let model = self.embedder.model_id();
        let embedded: Vec<DocumentChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| chunk.with_embedding(embedding, model))
            .collect();

        let count = embedded.len();
        self.upsert(collection, embedded).await?;
        Ok(count)
    }

    async fn upsert(
        &self,
        collection: &str,
        chunks: Vec<DocumentChunk>,
    ) -> Result<(), VectorStoreError> {
        with_retry(&self.retry, || self.store.upsert(collection, chunks.clone()))
            .await
            .into_result()
    }
}

fn validate_name(name: &str) -> Result<(), IngestError> {
    if is_valid_collection_name(name) {
        Ok(())
    } else {
        Err(IngestError::InvalidCollectionName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EmbeddingError, ErrorKind};
    use crate::services::vector_store::InMemoryVectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` calls with a transient error.
    struct FlakyEmbedder {
        model: &'static str,
        failures: usize,
        calls: AtomicUsize,
        batch_sizes: std::sync::Mutex<Vec<usize>>,
    }

    impl FlakyEmbedder {
        fn new(model: &'static str, failures: usize) -> Self {
            Self {
                model,
                failures,
                calls: AtomicUsize::new(0),
                batch_sizes: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        fn model_id(&self) -> &str {
            self.model
        }

        fn dimension(&self) -> usize {
            2
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }

        async fn embed_documents(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(EmbeddingError::ConnectionError("reset by peer".into()));
            }
            self.batch_sizes.lock().unwrap().push(texts.len());
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0])
                .collect())
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(3).with_initial_delay(Duration::from_millis(1))
    }

    fn ingestor(embedder: FlakyEmbedder) -> (Ingestor, Arc<InMemoryVectorStore>) {
        let store = Arc::new(InMemoryVectorStore::new());
        let ingestor = Ingestor::new(Arc::new(embedder), store.clone()).with_retry(fast_retry());
        (ingestor, store)
    }

    #[tokio::test]
    async fn test_create_collection_uses_embedder_shape() {
        let (ingestor, store) = ingestor(FlakyEmbedder::new("mini", 0));
        let info = ingestor.create_collection("support").await.unwrap();
        assert_eq!(info.dimension, Some(2));
        assert_eq!(info.embedding_model.as_deref(), Some("mini"));

        let err = ingestor.create_collection("support").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CollectionExists);
        assert_eq!(store.list_collections().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_bad_collection_name() {
        let (ingestor, _) = ingestor(FlakyEmbedder::new("mini", 0));
        let err = ingestor.create_collection("../etc").await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidCollectionName(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_ingest_batches_and_skips_blank_chunks() {
        let (ingestor, store) = ingestor(FlakyEmbedder::new("mini", 0));
        let ingestor = ingestor.with_batch_size(2);
        ingestor.create_collection("kb").await.unwrap();

        let chunker = TextChunker::new(10, 2).unwrap();
        let docs = vec![
            Document::new("a.md", "Refunds are issued within thirty days."),
            Document::new("blank.md", "   "),
        ];

        let mut progress = 0;
        let stats = ingestor
            .ingest_with_progress("kb", &docs, &chunker, |n| progress += n)
            .await
            .unwrap();

        // 38 chars at step 8 -> windows at 0, 8, 16, 24, 32
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.chunks, 5);
        assert_eq!(progress, 5);

        let info = store.collection_info("kb").await.unwrap().unwrap();
        assert_eq!(info.points_count, 5);
    }

    #[tokio::test]
    async fn test_reingest_replaces_all_previous_chunks() {
        let (ingestor, store) = ingestor(FlakyEmbedder::new("mini", 0));
        ingestor.create_collection("kb").await.unwrap();
        let chunker = TextChunker::new(10, 2).unwrap();

        let long = "Refund policy: 30 days, no receipt needed, store credit";
        let other = Document::new("other.txt", "unrelated");
        ingestor
            .ingest_documents("kb", &[Document::new("policy.txt", long), other], &chunker)
            .await
            .unwrap();
        assert!(store.collection_info("kb").await.unwrap().unwrap().points_count > 2);

        let stats = ingestor
            .ingest_documents("kb", &[Document::new("policy.txt", "NEW: 14d")], &chunker)
            .await
            .unwrap();
        assert_eq!(stats.chunks, 1);

        let hits = store.search("kb", vec![1.0, 1.0], 50, None).await.unwrap();
        let mut texts: Vec<_> = hits.iter().map(|h| h.text.as_str()).collect();
        texts.sort();
        assert_eq!(texts, vec!["NEW: 14d", "unrelated"]);
    }

    #[tokio::test]
    async fn test_transient_embedding_failure_is_retried() {
        let embedder = FlakyEmbedder::new("mini", 2);
        let (ingestor, store) = ingestor(embedder);
        ingestor.create_collection("kb").await.unwrap();

        let chunker = TextChunker::new(800, 100).unwrap();
        let stats = ingestor
            .ingest_documents("kb", &[Document::new("a.md", "short text")], &chunker)
            .await
            .unwrap();

        assert_eq!(stats.chunks, 1);
        assert_eq!(store.collection_info("kb").await.unwrap().unwrap().points_count, 1);
    }

    #[tokio::test]
    async fn test_ingest_into_missing_collection() {
        let (ingestor, _) = ingestor(FlakyEmbedder::new("mini", 0));
        let chunker = TextChunker::new(800, 100).unwrap();
        let err = ingestor
            .ingest_documents("nope", &[Document::new("a.md", "text")], &chunker)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CollectionNotFound);
    }

    #[tokio::test]
    async fn test_ingest_refuses_other_model() {
        let store = Arc::new(InMemoryVectorStore::new());
        store
            .create_collection(&CollectionSpec {
                name: "kb".into(),
                dimension: 2,
                embedding_model: "large".into(),
            })
            .await
            .unwrap();
        let ingestor = Ingestor::new(Arc::new(FlakyEmbedder::new("mini", 0)), store);
        let chunker = TextChunker::new(800, 100).unwrap();

        let err = ingestor
            .ingest_documents("kb", &[Document::new("a.md", "text")], &chunker)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmbeddingModelMismatch);
    }

    #[tokio::test]
    async fn test_insert_chunks_validates_embeddings() {
        let (ingestor, store) = ingestor(FlakyEmbedder::new("mini", 0));
        ingestor.create_collection("kb").await.unwrap();

        let wrong_dim = DocumentChunk::pre_embedded("a", "t", 0, vec![1.0, 2.0, 3.0], None);
        let err = ingestor.insert_chunks("kb", vec![wrong_dim]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmbeddingModelMismatch);

        let mut missing = DocumentChunk::pre_embedded("a", "t", 0, vec![1.0, 2.0], None);
        missing.embedding = None;
        let err = ingestor.insert_chunks("kb", vec![missing]).await.unwrap_err();
        assert!(matches!(err, IngestError::MissingEmbedding(_)));

        let other_model =
            DocumentChunk::pre_embedded("a", "t", 0, vec![1.0, 2.0], Some("large".into()));
        let err = ingestor.insert_chunks("kb", vec![other_model]).await.unwrap_err();
        assert!(matches!(err, IngestError::EmbeddingModelMismatch { .. }));

        let unnamed = DocumentChunk::pre_embedded("a", "t", 0, vec![1.0, 2.0], None);
        let err = ingestor.insert_chunks("kb", vec![unnamed]).await.unwrap_err();
        assert!(matches!(err, IngestError::MissingEmbeddingModel(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(store.collection_info("kb").await.unwrap().unwrap().points_count, 0);

        let ok = vec![
            DocumentChunk::pre_embedded("a", "one", 0, vec![1.0, 2.0], Some("mini".into())),
            DocumentChunk::pre_embedded("a", "two", 700, vec![2.0, 1.0], Some("mini".into())),
        ];
        assert_eq!(ingestor.insert_chunks("kb", ok).await.unwrap(), 2);
        assert_eq!(store.collection_info("kb").await.unwrap().unwrap().points_count, 2);
    }
}
