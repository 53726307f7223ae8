//! Text embedding behind a single trait, with a remote and a local backend.

mod http;
mod onnx;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EmbeddingError;
use crate::models::{EmbeddingBackend, EmbeddingConfig};

pub use http::HttpEmbeddingClient;
pub use onnx::OnnxEmbedder;

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier recorded on every chunk this provider embeds.
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }
}

pub fn create_embedder(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.backend {
        EmbeddingBackend::Http => {
            tracing::info!(url = %config.url, model = %config.model_id, "using HTTP embedding server");
            Ok(Arc::new(HttpEmbeddingClient::new(config)?))
        }
        EmbeddingBackend::Onnx => {
            let model_dir = config.resolved_model_dir().ok_or_else(|| {
                EmbeddingError::Model(crate::error::ModelError::NotFound(
                    "could not determine model directory".to_string(),
                ))
            })?;
            tracing::info!(dir = %model_dir.display(), model = %config.model_id, "loading ONNX embedding model");
            Ok(Arc::new(OnnxEmbedder::load(config, &model_dir)?))
        }
    }
}

/// Check that every vector has the expected dimension.
pub(crate) fn ensure_dimension(
    embeddings: &[Vec<f32>],
    expected: usize,
) -> Result<(), EmbeddingError> {
    match embeddings.iter().find(|e| e.len() != expected) {
        Some(bad) => Err(EmbeddingError::InvalidResponse(format!(
            "expected {expected}-dimensional embeddings, got {}",
            bad.len()
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_dimension() {
        assert!(ensure_dimension(&[vec![0.0; 3], vec![1.0; 3]], 3).is_ok());
        assert!(matches!(
            ensure_dimension(&[vec![0.0; 3], vec![1.0; 4]], 3),
            Err(EmbeddingError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_create_http_embedder() {
        let config = EmbeddingConfig::default();
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.model_id(), "sentence-transformers/all-MiniLM-L6-v2");
        assert_eq!(embedder.dimension(), 384);
    }

    #[test]
    fn test_create_onnx_embedder_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::Onnx,
            model_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(
            create_embedder(&config),
            Err(EmbeddingError::Model(crate::error::ModelError::NotFound(_)))
        ));
    }
}
