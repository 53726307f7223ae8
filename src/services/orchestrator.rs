//! Per-query retrieval decisions and prompt assembly.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{EmbeddingError, QueryError, VectorStoreError};
use crate::models::{
    Mode, Prompt, QueryContext, RetrievalResult, RetrievalScope, RetrievedChunk,
};
use crate::services::embedding::EmbeddingProvider;
use crate::services::vector_store::VectorStore;

const CONTEXT_PREAMBLE: &str = "Use the following context to answer:";
const CONTEXT_SEPARATOR: &str = "\n\n";

/// Decides whether a turn gets document context and builds the prompt.
///
/// Holds no per-query state, so one instance serves concurrent requests.
#[derive(Clone)]
pub struct RetrievalOrchestrator {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    timeout: Option<Duration>,
}

impl RetrievalOrchestrator {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            timeout: None,
        }
    }

    /// Bound each embedding and search call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn handle_query(
        &self,
        ctx: &QueryContext,
        scope: &RetrievalScope,
    ) -> Result<(Prompt, RetrievalResult), QueryError> {
        let general = general_prompt(ctx)?;
        let query = general.user.as_str();

        if ctx.mode == Mode::General {
            return Ok((general, RetrievalResult::skipped()));
        }

        let vector = self
            .bounded(self.embedder.embed_query(query), EmbeddingError::Timeout)
            .await
            .map_err(QueryError::EmbeddingUnavailable)?;

        self.check_collection(&scope.collection).await?;

        let hits = self
            .bounded(
                self.store.search(
                    &scope.collection,
                    vector,
                    u64::from(scope.top_k),
                    scope.min_score,
                ),
                VectorStoreError::Timeout,
            )
            .await
            .map_err(retrieval_error)?;

        let hits = select_hits(hits, scope);

        if hits.is_empty() {
            tracing::info!(collection = %scope.collection, "no relevant context, answering without it");
            return Ok((general, RetrievalResult::no_context()));
        }

        tracing::debug!(
            collection = %scope.collection,
            hits = hits.len(),
            top_score = hits[0].score,
            "retrieved context"
        );

        let prompt = Prompt {
            system: ctx.system_message.clone(),
            user: build_context_prompt(&hits, query),
        };
        Ok((prompt, RetrievalResult::found(hits)))
    }

    /// Vectors from a different model are not comparable, even at equal dimension.
    async fn check_collection(&self, collection: &str) -> Result<(), QueryError> {
        let info = self
            .bounded(
                self.store.collection_info(collection),
                VectorStoreError::Timeout,
            )
            .await
            .map_err(retrieval_error)?
            .ok_or_else(|| QueryError::CollectionNotFound(collection.to_string()))?;

        let actual = self.embedder.model_id();
        match info.embedding_model {
            Some(expected) if expected != actual => Err(QueryError::EmbeddingModelMismatch {
                collection: collection.to_string(),
                expected,
                actual: actual.to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn bounded<T, E, F>(&self, call: F, on_timeout: E) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(on_timeout)),
            None => call.await,
        }
    }
}

fn retrieval_error(error: VectorStoreError) -> QueryError {
    match error {
        VectorStoreError::CollectionNotFound(name) => QueryError::CollectionNotFound(name),
        other => QueryError::RetrievalUnavailable(other),
    }
}

/// The prompt for a turn answered without document context.
pub fn general_prompt(ctx: &QueryContext) -> Result<Prompt, QueryError> {
    let query = ctx.raw_query.trim();
    if query.is_empty() {
        return Err(QueryError::InvalidQuery);
    }
    Ok(Prompt {
        system: ctx.system_message.clone(),
        user: query.to_string(),
    })
}

/// Apply the scope's floor and limit regardless of what the store honoured,
/// keeping the most similar (and, on ties, earliest inserted) hits.
fn select_hits(mut hits: Vec<RetrievedChunk>, scope: &RetrievalScope) -> Vec<RetrievedChunk> {
    if let Some(min) = scope.min_score {
        hits.retain(|h| h.score >= min);
    }
    crate::services::vector_store::rank(&mut hits);
    hits.truncate(scope.top_k as usize);
    hits
}

pub fn build_context_prompt(hits: &[RetrievedChunk], query: &str) -> String {
    let context = hits
        .iter()
        .map(|h| h.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);
    format!("{CONTEXT_PREAMBLE}\n\n{context}\n\nQuestion: {query}")
}
