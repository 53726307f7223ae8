use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::models::{Config, Mode, Provider};
use crate::services::{
    EmbeddingProvider, Ingestor, LlmGateway, MetricsStore, MetricsSummary, RequestRecord,
    RetrievalOrchestrator, VectorStore,
};

/// Shared by every handler. Read-only apart from the metrics log.
pub struct AppState {
    pub config: Config,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub store: Arc<dyn VectorStore>,
    pub orchestrator: RetrievalOrchestrator,
    pub ingestor: Ingestor,
    pub gateway: LlmGateway,
    metrics: Option<Arc<Mutex<MetricsStore>>>,
}

impl AppState {
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        gateway: LlmGateway,
    ) -> Self {
        let orchestrator = RetrievalOrchestrator::new(embedder.clone(), store.clone())
            .with_timeout(config.retrieval.timeout_secs.map(Duration::from_secs));
        let ingestor = Ingestor::new(embedder.clone(), store.clone())
            .with_batch_size(config.embedding.batch_size as usize);
        Self {
            config,
            embedder,
            store,
            orchestrator,
            ingestor,
            gateway,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsStore) -> Self {
        self.metrics = Some(Arc::new(Mutex::new(metrics)));
        self
    }

    /// SQLite writes run on the blocking pool so request tasks never wait on disk.
    pub async fn record_request(
        &self,
        provider: Provider,
        mode: Mode,
        latency: Duration,
        error_kind: Option<&'static str>,
    ) {
        let Some(metrics) = self.metrics.clone() else {
            return;
        };
        let record = RequestRecord {
            provider,
            mode,
            latency_ms: latency.as_millis() as u64,
            error_kind,
        };
        let written = tokio::task::spawn_blocking(move || match metrics.lock() {
            Ok(store) => store.record(&record),
            Err(_) => tracing::warn!("metrics store lock poisoned, dropping record"),
        })
        .await;
        if let Err(e) = written {
            tracing::warn!(error = %e, "metrics writer task failed");
        }
    }

    pub async fn metrics_summary(&self) -> Option<MetricsSummary> {
        let metrics = self.metrics.clone()?;
        let retention_days = self.config.metrics.retention_days;
        tokio::task::spawn_blocking(move || {
            let store = metrics.lock().ok()?;
            Some(store.get_summary(retention_days))
        })
        .await
        .ok()
        .flatten()
    }
}
