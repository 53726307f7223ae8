//! Qdrant vector store backend implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointStruct,
    PointsIdsList, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, Value,
    VectorParamsBuilder, vectors_config,
};
use uuid::Uuid;

use super::{VectorStore, rank, take_embedding};
use crate::error::VectorStoreError;
use crate::models::{
    CollectionInfo, CollectionSpec, DocumentChunk, RetrievedChunk, VectorDriver, VectorStoreConfig,
};

/// Holds one point per collection recording its dimension and embedding model.
/// The leading underscore keeps it outside the user collection namespace.
const REGISTRY_COLLECTION: &str = "_ragchat_registry";

pub struct QdrantBackend {
    client: Qdrant,
    last_sequence: AtomicU64,
}

impl QdrantBackend {
    pub fn new(config: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        let mut builder = Qdrant::from_url(&config.url);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            last_sequence: AtomicU64::new(0),
        })
    }

    /// Reserve `count` increasing sequence numbers, seeded from the wall clock so
    /// later writers from other processes still sort after earlier ones.
    fn reserve_sequences(&self, count: u64) -> u64 {
        let now = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0);
        let mut current = self.last_sequence.load(Ordering::Relaxed);
        loop {
            let start = now.max(current + 1);
            match self.last_sequence.compare_exchange(
                current,
                start + count.saturating_sub(1),
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return start,
                Err(actual) => current = actual,
            }
        }
    }

    async fn ensure_registry(&self) -> Result<(), VectorStoreError> {
        let existing = self
            .client
            .list_collections()
            .await
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;
        if existing
            .collections
            .iter()
            .any(|c| c.name == REGISTRY_COLLECTION)
        {
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(REGISTRY_COLLECTION)
                    .vectors_config(VectorParamsBuilder::new(1, Distance::Dot)),
            )
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;
        Ok(())
    }

    async fn register(&self, spec: &CollectionSpec) -> Result<(), VectorStoreError> {
        self.ensure_registry().await?;
        let point = PointStruct::new(
            registry_point_id(&spec.name),
            vec![1.0],
            registry_payload(spec),
        );
        self.client
            .upsert_points(UpsertPointsBuilder::new(REGISTRY_COLLECTION, vec![point]).wait(true))
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;
        Ok(())
    }

    async fn unregister(&self, name: &str) -> Result<(), VectorStoreError> {
        let ids = vec![registry_point_id(name).into()];
        match self
            .client
            .delete_points(
                DeletePointsBuilder::new(REGISTRY_COLLECTION)
                    .points(PointsIdsList { ids })
                    .wait(true),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e.to_string()) => Ok(()),
            Err(e) => Err(VectorStoreError::DeleteError(e.to_string())),
        }
    }

    /// The model recorded when the collection was created.
    async fn registered_model(&self, name: &str) -> Result<Option<String>, VectorStoreError> {
        let response = match self
            .client
            .scroll(
                ScrollPointsBuilder::new(REGISTRY_COLLECTION)
                    .filter(Filter::must([Condition::matches("name", name.to_string())]))
                    .limit(1)
                    .with_payload(true)
                    .with_vectors(false),
            )
            .await
        {
            Ok(response) => response,
            Err(e) if is_not_found(&e.to_string()) => return Ok(None),
            Err(e) => return Err(VectorStoreError::CollectionError(e.to_string())),
        };

        Ok(response
            .result
            .first()
            .and_then(|p| payload_str(&p.payload, "embedding_model"))
            .map(str::to_string))
    }

    /// Fallback for collections created outside ragchat: read the model off a stored point.
    async fn model_from_points(&self, name: &str) -> Result<Option<String>, VectorStoreError> {
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(name)
                    .limit(1)
                    .with_payload(true)
                    .with_vectors(false),
            )
            .await
            .map_err(|e| map_collection_error(name, e))?;

        Ok(response
            .result
            .first()
            .and_then(|p| payload_str(&p.payload, "embedding_model"))
            .map(str::to_string))
    }
}

fn registry_point_id(name: &str) -> String {
    let key = format!("collection:{name}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

fn registry_payload(spec: &CollectionSpec) -> HashMap<String, Value> {
    let mut payload: HashMap<String, Value> = HashMap::new();
    payload.insert("name".to_string(), spec.name.clone().into());
    payload.insert("embedding_model".to_string(), spec.embedding_model.clone().into());
    payload.insert(
        "dimension".to_string(),
        i64::try_from(spec.dimension).unwrap_or(i64::MAX).into(),
    );
    payload
}

fn is_not_found(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("not found") || message.contains("doesn't exist")
}

fn map_collection_error(name: &str, error: qdrant_client::QdrantError) -> VectorStoreError {
    let message = error.to_string();
    if is_not_found(&message) {
        VectorStoreError::CollectionNotFound(name.to_string())
    } else {
        VectorStoreError::CollectionError(message)
    }
}

fn payload_str<'a>(payload: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.as_str()),
        _ => None,
    }
}

fn payload_int(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(n)) => Some(*n),
        _ => None,
    }
}

fn chunk_payload(chunk: DocumentChunk, sequence: u64) -> HashMap<String, Value> {
    let mut payload: HashMap<String, Value> = HashMap::new();
    payload.insert("document_id".to_string(), chunk.document_id.into());
    payload.insert("source_id".to_string(), chunk.source_id.into());
    payload.insert("text".to_string(), chunk.text.into());
    payload.insert(
        "offset".to_string(),
        i64::try_from(chunk.offset).unwrap_or(i64::MAX).into(),
    );
    payload.insert(
        "chunk_index".to_string(),
        i64::from(chunk.chunk_index).into(),
    );
    payload.insert(
        "sequence".to_string(),
        i64::try_from(sequence).unwrap_or(i64::MAX).into(),
    );
    if let Some(model) = chunk.embedding_model {
        payload.insert("embedding_model".to_string(), model.into());
    }
    payload
}

#[async_trait]
impl VectorStore for QdrantBackend {
    fn driver(&self) -> VectorDriver {
        VectorDriver::Qdrant
    }

    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.client
            .health_check()
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    async fn create_collection(
        &self,
        spec: &CollectionSpec,
    ) -> Result<CollectionInfo, VectorStoreError> {
        let existing = self
            .client
            .list_collections()
            .await
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;
        if spec.name == REGISTRY_COLLECTION
            || existing.collections.iter().any(|c| c.name == spec.name)
        {
            return Err(VectorStoreError::CollectionExists(spec.name.clone()));
        }

        // Registered first; a leftover entry is overwritten by the next create.
        self.register(spec).await?;
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&spec.name)
                    .vectors_config(VectorParamsBuilder::new(spec.dimension, Distance::Cosine)),
            )
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        tracing::info!(collection = %spec.name, dimension = spec.dimension, model = %spec.embedding_model, "created qdrant collection");
        Ok(CollectionInfo::from_spec(spec, 0))
    }

    async fn delete_collection(&self, name: &str) -> Result<(), VectorStoreError> {
        if self.collection_info(name).await?.is_none() {
            return Err(VectorStoreError::CollectionNotFound(name.to_string()));
        }

        self.client
            .delete_collection(name)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;
        self.unregister(name).await
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, VectorStoreError> {
        let response = self
            .client
            .list_collections()
            .await
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        let mut names: Vec<String> = response
            .collections
            .into_iter()
            .map(|c| c.name)
            .filter(|name| name != REGISTRY_COLLECTION)
            .collect();
        names.sort();

        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            // A collection dropped between the listing and the lookup is skipped.
            if let Some(info) = self.collection_info(&name).await? {
                infos.push(info);
            }
        }
        Ok(infos)
    }

    async fn collection_info(
        &self,
        name: &str,
    ) -> Result<Option<CollectionInfo>, VectorStoreError> {
        if name == REGISTRY_COLLECTION {
            return Ok(None);
        }
        let response = match self.client.collection_info(name).await {
            Ok(response) => response,
            Err(e) if is_not_found(&e.to_string()) => return Ok(None),
            Err(e) => return Err(VectorStoreError::CollectionError(e.to_string())),
        };

        let Some(result) = response.result else {
            return Ok(None);
        };

        let dimension = result
            .config
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|c| match c {
                vectors_config::Config::Params(params) => Some(params.size),
                vectors_config::Config::ParamsMap(_) => None,
            });

        let embedding_model = match self.registered_model(name).await? {
            Some(model) => Some(model),
            None => self.model_from_points(name).await?,
        };

        Ok(Some(CollectionInfo {
            name: name.to_string(),
            points_count: result.points_count.unwrap_or(0),
            dimension,
            embedding_model,
        }))
    }

    async fn upsert(
        &self,
        collection: &str,
        chunks: Vec<DocumentChunk>,
    ) -> Result<(), VectorStoreError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let start = self.reserve_sequences(chunks.len() as u64);
        let points = chunks
            .into_iter()
            .enumerate()
            .map(|(i, mut chunk)| {
                let vector = take_embedding(&mut chunk, None)?;
                let id = chunk.id.clone();
                Ok(PointStruct::new(
                    id,
                    vector,
                    chunk_payload(chunk, start + i as u64),
                ))
            })
            .collect::<Result<Vec<_>, VectorStoreError>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(|e| {
                let message = e.to_string();
                if is_not_found(&message) {
                    VectorStoreError::CollectionNotFound(collection.to_string())
                } else {
                    VectorStoreError::UpsertError(message)
                }
            })?;

        Ok(())
    }

    async fn delete_by_document_ids(
        &self,
        collection: &str,
        document_ids: &[String],
    ) -> Result<(), VectorStoreError> {
        if document_ids.is_empty() {
            return Ok(());
        }

        let conditions: Vec<Condition> = document_ids
            .iter()
            .map(|id| Condition::matches("document_id", id.clone()))
            .collect();

        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(Filter::should(conditions))
                    .wait(true),
            )
            .await
            .map_err(|e| {
                let message = e.to_string();
                if is_not_found(&message) {
                    VectorStoreError::CollectionNotFound(collection.to_string())
                } else {
                    VectorStoreError::DeleteError(message)
                }
            })?;

        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query_vector: Vec<f32>,
        limit: u64,
        min_score: Option<f32>,
    ) -> Result<Vec<RetrievedChunk>, VectorStoreError> {
        let mut search_builder =
            SearchPointsBuilder::new(collection, query_vector, limit).with_payload(true);

        if let Some(score) = min_score {
            search_builder = search_builder.score_threshold(score);
        }

        let response = self.client.search_points(search_builder).await.map_err(|e| {
            let message = e.to_string();
            if is_not_found(&message) {
                VectorStoreError::CollectionNotFound(collection.to_string())
            } else {
                VectorStoreError::SearchError(message)
            }
        })?;

        let mut hits: Vec<RetrievedChunk> = response
            .result
            .into_iter()
            .map(|point| {
                let chunk_id = match point.id.and_then(|id| id.point_id_options) {
                    Some(PointIdOptions::Uuid(uuid)) => uuid,
                    Some(PointIdOptions::Num(num)) => num.to_string(),
                    None => String::new(),
                };
                let payload = &point.payload;

                RetrievedChunk {
                    chunk_id,
                    source_id: payload_str(payload, "source_id").unwrap_or("").to_string(),
                    text: payload_str(payload, "text").unwrap_or("").to_string(),
                    offset: payload_int(payload, "offset")
                        .and_then(|n| u64::try_from(n).ok())
                        .unwrap_or(0),
                    score: point.score,
                    sequence: payload_int(payload, "sequence")
                        .and_then(|n| u64::try_from(n).ok())
                        .unwrap_or(u64::MAX),
                }
            })
            .collect();

        rank(&mut hits);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> QdrantBackend {
        QdrantBackend::new(&VectorStoreConfig::default()).unwrap()
    }

    #[test]
    fn test_reserve_sequences_is_monotonic() {
        let backend = backend();
        let first = backend.reserve_sequences(10);
        let second = backend.reserve_sequences(1);
        assert!(second >= first + 10);
    }

    #[test]
    fn test_chunk_payload_fields() {
        let chunk = DocumentChunk::pre_embedded(
            "faq.md",
            "Refunds within 30 days",
            42,
            vec![1.0],
            Some("mini".to_string()),
        );
        let payload = chunk_payload(chunk, 7);

        assert_eq!(payload_str(&payload, "source_id"), Some("faq.md"));
        assert_eq!(payload_str(&payload, "text"), Some("Refunds within 30 days"));
        assert_eq!(payload_str(&payload, "embedding_model"), Some("mini"));
        assert_eq!(payload_int(&payload, "offset"), Some(42));
        assert_eq!(payload_int(&payload, "sequence"), Some(7));
    }

    #[test]
    fn test_registry_payload_records_model() {
        let spec = CollectionSpec {
            name: "kb".to_string(),
            dimension: 384,
            embedding_model: "mini".to_string(),
        };
        let payload = registry_payload(&spec);

        assert_eq!(payload_str(&payload, "name"), Some("kb"));
        assert_eq!(payload_str(&payload, "embedding_model"), Some("mini"));
        assert_eq!(payload_int(&payload, "dimension"), Some(384));
    }

    #[test]
    fn test_registry_point_id_per_collection() {
        assert_eq!(registry_point_id("kb"), registry_point_id("kb"));
        assert_ne!(registry_point_id("kb"), registry_point_id("kb2"));
        assert!(Uuid::parse_str(&registry_point_id("kb")).is_ok());
    }

    #[test]
    fn test_registry_is_outside_user_namespace() {
        assert!(!crate::models::is_valid_collection_name(REGISTRY_COLLECTION));
    }

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found("status: Not found: Collection `docs` doesn't exist!"));
        assert!(!is_not_found("connection refused"));
    }
}
