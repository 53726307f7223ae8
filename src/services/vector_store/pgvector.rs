use std::time::Duration;

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};

use super::{VectorStore, take_embedding};
use crate::error::VectorStoreError;
use crate::models::{
    CollectionInfo, CollectionSpec, DocumentChunk, RetrievedChunk, VectorDriver, VectorStoreConfig,
    is_valid_collection_name,
};

const REGISTRY_TABLE: &str = "ragchat_collections";

/// One table per collection plus a registry table recording each collection's
/// dimension and embedding model.
pub struct PgVectorBackend {
    pool: PgPool,
}

/// Quoted table name for a collection. Only validated names reach this point.
fn chunk_table(collection: &str) -> String {
    format!("\"ragchat_chunks_{}\"", collection)
}

fn ensure_valid_name(name: &str) -> Result<(), VectorStoreError> {
    if is_valid_collection_name(name) {
        Ok(())
    } else {
        Err(VectorStoreError::CollectionError(format!(
            "invalid collection name: {name}"
        )))
    }
}

impl PgVectorBackend {
    pub async fn new(config: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max)
            .acquire_timeout(Duration::from_secs(config.pool_acquire_timeout.into()))
            .connect(&config.url)
            .await
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        let backend = Self { pool };
        backend.check_pgvector_extension().await?;
        backend.ensure_registry().await?;
        Ok(backend)
    }

    async fn check_pgvector_extension(&self) -> Result<(), VectorStoreError> {
        let result: Option<(String,)> =
            sqlx::query_as("SELECT extname FROM pg_extension WHERE extname = 'vector'")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| VectorStoreError::PostgresError(e.to_string()))?;

        if result.is_none() {
            return Err(VectorStoreError::PgVectorExtensionError(
                "pgvector extension is not installed. Run: CREATE EXTENSION vector;".to_string(),
            ));
        }

        Ok(())
    }

    async fn ensure_registry(&self) -> Result<(), VectorStoreError> {
        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {REGISTRY_TABLE} (
                name TEXT PRIMARY KEY,
                dimension INTEGER NOT NULL,
                embedding_model TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#
        );
        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::PostgresError(e.to_string()))?;
        Ok(())
    }

    async fn registered(&self, name: &str) -> Result<Option<(i32, String)>, VectorStoreError> {
        let query =
            format!("SELECT dimension, embedding_model FROM {REGISTRY_TABLE} WHERE name = $1");
        sqlx::query_as(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VectorStoreError::PostgresError(e.to_string()))
    }

    async fn count(&self, name: &str) -> Result<u64, VectorStoreError> {
        let query = format!("SELECT COUNT(*) FROM {}", chunk_table(name));
        let row: (i64,) = sqlx::query_as(&query)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| VectorStoreError::PostgresError(e.to_string()))?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }
}

#[async_trait]
impl VectorStore for PgVectorBackend {
    fn driver(&self) -> VectorDriver {
        VectorDriver::PostgreSQL
    }

    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    async fn create_collection(
        &self,
        spec: &CollectionSpec,
    ) -> Result<CollectionInfo, VectorStoreError> {
        ensure_valid_name(&spec.name)?;
        let table = chunk_table(&spec.name);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO {REGISTRY_TABLE} (name, dimension, embedding_model) VALUES ($1, $2, $3) \
             ON CONFLICT (name) DO NOTHING"
        ))
        .bind(&spec.name)
        .bind(i32::try_from(spec.dimension).unwrap_or(i32::MAX))
        .bind(&spec.embedding_model)
        .execute(&mut *tx)
        .await
        .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        if inserted.rows_affected() == 0 {
            return Err(VectorStoreError::CollectionExists(spec.name.clone()));
        }

        let statements = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id UUID PRIMARY KEY,
                    seq BIGSERIAL NOT NULL,
                    document_id TEXT NOT NULL,
                    source_id TEXT NOT NULL,
                    chunk_index INTEGER NOT NULL,
                    text TEXT NOT NULL,
                    char_offset BIGINT NOT NULL,
                    embedding vector({dimension}) NOT NULL,
                    embedding_model TEXT
                )
                "#,
                dimension = spec.dimension
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS \"ragchat_{}_embedding_idx\" ON {table} USING hnsw (embedding vector_cosine_ops)",
                spec.name
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS \"ragchat_{}_document_idx\" ON {table} (document_id)",
                spec.name
            ),
        ];

        for statement in &statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        tracing::info!(collection = %spec.name, dimension = spec.dimension, "created pgvector collection");
        Ok(CollectionInfo::from_spec(spec, 0))
    }

    async fn delete_collection(&self, name: &str) -> Result<(), VectorStoreError> {
        ensure_valid_name(name)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        let deleted = sqlx::query(&format!("DELETE FROM {REGISTRY_TABLE} WHERE name = $1"))
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        if deleted.rows_affected() == 0 {
            return Err(VectorStoreError::CollectionNotFound(name.to_string()));
        }

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", chunk_table(name)))
            .execute(&mut *tx)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, VectorStoreError> {
        let query = format!(
            "SELECT name, dimension, embedding_model FROM {REGISTRY_TABLE} ORDER BY name"
        );
        let rows: Vec<(String, i32, String)> = sqlx::query_as(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VectorStoreError::PostgresError(e.to_string()))?;

        let mut infos = Vec::with_capacity(rows.len());
        for (name, dimension, embedding_model) in rows {
            let points_count = self.count(&name).await?;
            infos.push(CollectionInfo {
                name,
                points_count,
                dimension: u64::try_from(dimension).ok(),
                embedding_model: Some(embedding_model),
            });
        }
        Ok(infos)
    }

    async fn collection_info(
        &self,
        name: &str,
    ) -> Result<Option<CollectionInfo>, VectorStoreError> {
        if !is_valid_collection_name(name) {
            return Ok(None);
        }
        let Some((dimension, embedding_model)) = self.registered(name).await? else {
            return Ok(None);
        };

        Ok(Some(CollectionInfo {
            name: name.to_string(),
            points_count: self.count(name).await?,
            dimension: u64::try_from(dimension).ok(),
            embedding_model: Some(embedding_model),
        }))
    }

    async fn upsert(
        &self,
        collection: &str,
        chunks: Vec<DocumentChunk>,
    ) -> Result<(), VectorStoreError> {
        ensure_valid_name(collection)?;
        let Some((dimension, _)) = self.registered(collection).await? else {
            return Err(VectorStoreError::CollectionNotFound(collection.to_string()));
        };
        if chunks.is_empty() {
            return Ok(());
        }

        let query = format!(
            r#"
            INSERT INTO {} (id, document_id, source_id, chunk_index, text, char_offset,
                            embedding, embedding_model)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                document_id = EXCLUDED.document_id,
                source_id = EXCLUDED.source_id,
                chunk_index = EXCLUDED.chunk_index,
                text = EXCLUDED.text,
                char_offset = EXCLUDED.char_offset,
                embedding = EXCLUDED.embedding,
                embedding_model = EXCLUDED.embedding_model
            "#,
            chunk_table(collection)
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

        for mut chunk in chunks {
            let embedding = take_embedding(&mut chunk, u64::try_from(dimension).ok())?;
            let id = uuid::Uuid::parse_str(&chunk.id)
                .map_err(|e| VectorStoreError::UpsertError(format!("invalid UUID: {}", e)))?;

            sqlx::query(&query)
                .bind(id)
                .bind(&chunk.document_id)
                .bind(&chunk.source_id)
                .bind(i32::try_from(chunk.chunk_index).unwrap_or(i32::MAX))
                .bind(&chunk.text)
                .bind(i64::try_from(chunk.offset).unwrap_or(i64::MAX))
                .bind(Vector::from(embedding))
                .bind(&chunk.embedding_model)
                .execute(&mut *tx)
                .await
                .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

        Ok(())
    }

    async fn delete_by_document_ids(
        &self,
        collection: &str,
        document_ids: &[String],
    ) -> Result<(), VectorStoreError> {
        ensure_valid_name(collection)?;
        if self.registered(collection).await?.is_none() {
            return Err(VectorStoreError::CollectionNotFound(collection.to_string()));
        }
        if document_ids.is_empty() {
            return Ok(());
        }

        let query = format!(
            "DELETE FROM {} WHERE document_id = ANY($1)",
            chunk_table(collection)
        );
        sqlx::query(&query)
            .bind(document_ids)
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query_vector: Vec<f32>,
        limit: u64,
        min_score: Option<f32>,
    ) -> Result<Vec<RetrievedChunk>, VectorStoreError> {
        ensure_valid_name(collection)?;
        if self.registered(collection).await?.is_none() {
            return Err(VectorStoreError::CollectionNotFound(collection.to_string()));
        }

        let where_clause = if min_score.is_some() {
            "WHERE (1 - (embedding <=> $1)) >= $3"
        } else {
            ""
        };

        let query = format!(
            r#"
            SELECT
                id::text AS chunk_id,
                source_id,
                text,
                char_offset,
                seq,
                1 - (embedding <=> $1) AS score
            FROM {}
            {}
            ORDER BY embedding <=> $1, seq
            LIMIT $2
            "#,
            chunk_table(collection),
            where_clause
        );

        let mut query_builder = sqlx::query(&query)
            .bind(Vector::from(query_vector))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX));
        if let Some(score) = min_score {
            query_builder = query_builder.bind(f64::from(score));
        }

        let rows = query_builder
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        let hits = rows
            .into_iter()
            .map(|row: PgRow| {
                let score: f64 = row.get("score");
                let offset: i64 = row.get("char_offset");
                let seq: i64 = row.get("seq");
                RetrievedChunk {
                    chunk_id: row.get("chunk_id"),
                    source_id: row.get("source_id"),
                    text: row.get("text"),
                    offset: u64::try_from(offset).unwrap_or(0),
                    score: score as f32,
                    sequence: u64::try_from(seq).unwrap_or(u64::MAX),
                }
            })
            .collect();

        Ok(hits)
    }
}
