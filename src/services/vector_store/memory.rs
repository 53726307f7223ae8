use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{VectorStore, rank, take_embedding};
use crate::error::VectorStoreError;
use crate::models::{
    CollectionInfo, CollectionSpec, DocumentChunk, RetrievedChunk, VectorDriver,
};

struct StoredChunk {
    chunk: DocumentChunk,
    vector: Vec<f32>,
    sequence: u64,
}

struct MemoryCollection {
    spec: CollectionSpec,
    chunks: Vec<StoredChunk>,
    next_sequence: u64,
}

impl MemoryCollection {
    fn info(&self) -> CollectionInfo {
        CollectionInfo::from_spec(&self.spec, self.chunks.len() as u64)
    }
}

/// Process-local store with brute-force cosine search. Contents are lost on exit.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn driver(&self) -> VectorDriver {
        VectorDriver::Memory
    }

    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        Ok(true)
    }

    async fn create_collection(
        &self,
        spec: &CollectionSpec,
    ) -> Result<CollectionInfo, VectorStoreError> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(&spec.name) {
            return Err(VectorStoreError::CollectionExists(spec.name.clone()));
        }

        let collection = MemoryCollection {
            spec: spec.clone(),
            chunks: Vec::new(),
            next_sequence: 0,
        };
        let info = collection.info();
        collections.insert(spec.name.clone(), collection);
        Ok(info)
    }

    async fn delete_collection(&self, name: &str) -> Result<(), VectorStoreError> {
        self.collections
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VectorStoreError::CollectionNotFound(name.to_string()))
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, VectorStoreError> {
        let collections = self.collections.read().await;
        let mut infos: Vec<_> = collections.values().map(MemoryCollection::info).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn collection_info(
        &self,
        name: &str,
    ) -> Result<Option<CollectionInfo>, VectorStoreError> {
        Ok(self
            .collections
            .read()
            .await
            .get(name)
            .map(MemoryCollection::info))
    }

    async fn upsert(
        &self,
        collection: &str,
        chunks: Vec<DocumentChunk>,
    ) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?;

        // Validate the whole batch before touching the collection.
        let dimension = Some(target.spec.dimension);
        let prepared = chunks
            .into_iter()
            .map(|mut chunk| take_embedding(&mut chunk, dimension).map(|vector| (chunk, vector)))
            .collect::<Result<Vec<_>, _>>()?;

        for (chunk, vector) in prepared {
            target.chunks.retain(|stored| stored.chunk.id != chunk.id);
            let sequence = target.next_sequence;
            target.next_sequence += 1;
            target.chunks.push(StoredChunk {
                chunk,
                vector,
                sequence,
            });
        }

        Ok(())
    }

    async fn delete_by_document_ids(
        &self,
        collection: &str,
        document_ids: &[String],
    ) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?;

        target
            .chunks
            .retain(|stored| !document_ids.contains(&stored.chunk.document_id));
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query_vector: Vec<f32>,
        limit: u64,
        min_score: Option<f32>,
    ) -> Result<Vec<RetrievedChunk>, VectorStoreError> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?;

        if query_vector.len() as u64 != target.spec.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: target.spec.dimension,
                actual: query_vector.len() as u64,
            });
        }

        let mut hits: Vec<RetrievedChunk> = target
            .chunks
            .iter()
            .map(|stored| (stored, cosine_similarity(&query_vector, &stored.vector)))
            .filter(|(_, score)| min_score.is_none_or(|min| *score >= min))
            .map(|(stored, score)| RetrievedChunk {
                chunk_id: stored.chunk.id.clone(),
                source_id: stored.chunk.source_id.clone(),
                text: stored.chunk.text.clone(),
                offset: stored.chunk.offset,
                score,
                sequence: stored.sequence,
            })
            .collect();

        rank(&mut hits);
        hits.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(hits)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, dimension: u64) -> CollectionSpec {
        CollectionSpec {
            name: name.to_string(),
            dimension,
            embedding_model: "test-model".to_string(),
        }
    }

    fn chunk(source: &str, offset: u64, text: &str, vector: Vec<f32>) -> DocumentChunk {
        DocumentChunk::pre_embedded(source, text, offset, vector, Some("test-model".into()))
    }

    #[tokio::test]
    async fn test_collection_lifecycle() {
        let store = InMemoryVectorStore::new();
        let info = store.create_collection(&spec("docs", 2)).await.unwrap();
        assert_eq!(info.points_count, 0);
        assert_eq!(info.dimension, Some(2));

        assert!(matches!(
            store.create_collection(&spec("docs", 2)).await,
            Err(VectorStoreError::CollectionExists(_))
        ));

        store.create_collection(&spec("archive", 2)).await.unwrap();
        let names: Vec<_> = store
            .list_collections()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["archive", "docs"]);

        store.delete_collection("docs").await.unwrap();
        assert!(store.collection_info("docs").await.unwrap().is_none());
        assert!(matches!(
            store.delete_collection("docs").await,
            Err(VectorStoreError::CollectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let store = InMemoryVectorStore::new();
        store.create_collection(&spec("docs", 2)).await.unwrap();
        store
            .upsert(
                "docs",
                vec![
                    chunk("a", 0, "orthogonal", vec![0.0, 1.0]),
                    chunk("b", 0, "aligned", vec![1.0, 0.0]),
                    chunk("c", 0, "close", vec![1.0, 0.2]),
                ],
            )
            .await
            .unwrap();

        let hits = store.search("docs", vec![1.0, 0.0], 2, None).await.unwrap();
        let texts: Vec<_> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["aligned", "close"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_equal_scores_keep_insertion_order() {
        let store = InMemoryVectorStore::new();
        store.create_collection(&spec("docs", 2)).await.unwrap();
        store
            .upsert("docs", vec![chunk("first", 0, "first", vec![1.0, 1.0])])
            .await
            .unwrap();
        store
            .upsert("docs", vec![chunk("second", 0, "second", vec![1.0, 1.0])])
            .await
            .unwrap();

        let hits = store.search("docs", vec![1.0, 1.0], 2, None).await.unwrap();
        assert_eq!(hits[0].text, "first");
        assert_eq!(hits[1].text, "second");
    }

    #[tokio::test]
    async fn test_min_score_filters() {
        let store = InMemoryVectorStore::new();
        store.create_collection(&spec("docs", 2)).await.unwrap();
        store
            .upsert("docs", vec![chunk("a", 0, "a", vec![0.0, 1.0])])
            .await
            .unwrap();

        let hits = store
            .search("docs", vec![1.0, 0.0], 3, Some(0.5))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_id() {
        let store = InMemoryVectorStore::new();
        store.create_collection(&spec("docs", 2)).await.unwrap();
        store
            .upsert("docs", vec![chunk("a", 0, "old", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert("docs", vec![chunk("a", 0, "new", vec![1.0, 0.0])])
            .await
            .unwrap();

        let info = store.collection_info("docs").await.unwrap().unwrap();
        assert_eq!(info.points_count, 1);
        let hits = store.search("docs", vec![1.0, 0.0], 3, None).await.unwrap();
        assert_eq!(hits[0].text, "new");
    }

    #[tokio::test]
    async fn test_delete_by_document_ids() {
        let store = InMemoryVectorStore::new();
        store.create_collection(&spec("docs", 2)).await.unwrap();
        let keep = chunk("keep.md", 0, "keep", vec![1.0, 0.0]);
        let drop_a = chunk("drop.md", 0, "drop a", vec![1.0, 0.0]);
        let drop_b = chunk("drop.md", 10, "drop b", vec![0.0, 1.0]);
        let dropped = drop_a.document_id.clone();
        store
            .upsert("docs", vec![keep, drop_a, drop_b])
            .await
            .unwrap();

        store
            .delete_by_document_ids("docs", &[dropped])
            .await
            .unwrap();

        let hits = store.search("docs", vec![1.0, 0.0], 5, None).await.unwrap();
        let texts: Vec<_> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["keep"]);
        assert!(matches!(
            store.delete_by_document_ids("nope", &[]).await,
            Err(VectorStoreError::CollectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_rejects_wrong_dimension_atomically() {
        let store = InMemoryVectorStore::new();
        store.create_collection(&spec("docs", 2)).await.unwrap();
        let result = store
            .upsert(
                "docs",
                vec![
                    chunk("a", 0, "ok", vec![1.0, 0.0]),
                    chunk("b", 0, "bad", vec![1.0, 0.0, 0.0]),
                ],
            )
            .await;

        assert!(matches!(
            result,
            Err(VectorStoreError::DimensionMismatch { .. })
        ));
        let info = store.collection_info("docs").await.unwrap().unwrap();
        assert_eq!(info.points_count, 0);
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let store = InMemoryVectorStore::new();
        assert!(matches!(
            store.search("nope", vec![1.0], 3, None).await,
            Err(VectorStoreError::CollectionNotFound(_))
        ));
        assert!(matches!(
            store.upsert("nope", vec![]).await,
            Err(VectorStoreError::CollectionNotFound(_))
        ));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
