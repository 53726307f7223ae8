use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{EmbeddingProvider, ensure_dimension};
use crate::error::EmbeddingError;
use crate::models::EmbeddingConfig;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

/// Client for a text-embeddings-inference compatible server (`POST /embed`).
#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    client: Client,
    base_url: String,
    model_id: String,
    dimension: usize,
    batch_size: usize,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            model_id: config.model_id.clone(),
            dimension: config.dimension as usize,
            batch_size: config.batch_size.max(1) as usize,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                inputs: texts,
                truncate: true,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout
                } else if e.is_connect() {
                    EmbeddingError::ConnectionError(e.to_string())
                } else {
                    EmbeddingError::RequestError(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ServerError(format!(
                "status {}: {}",
                status, body
            )));
        }

        let embeddings: Vec<Vec<f32>> = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                embeddings.len()
            )));
        }
        ensure_dimension(&embeddings, self.dimension)?;

        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }

    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            all.extend(self.embed_batch(batch).await?);
        }
        Ok(all)
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::ServerError(format!(
                "health check failed with status: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_for(url: String, dimension: u32, batch_size: u32) -> HttpEmbeddingClient {
        HttpEmbeddingClient::new(&EmbeddingConfig {
            url,
            dimension,
            batch_size,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_base_url_trimming() {
        let client = client_for("http://localhost:11411/".to_string(), 384, 32);
        assert_eq!(client.base_url(), "http://localhost:11411");
    }

    #[tokio::test]
    async fn test_embed_documents_batches_requests() {
        let router = Router::new().route(
            "/embed",
            post(|Json(body): Json<serde_json::Value>| async move {
                let n = body["inputs"].as_array().map(|a| a.len()).unwrap_or(0);
                Json(vec![vec![0.5f32, 0.5]; n])
            }),
        );
        let client = client_for(spawn(router).await, 2, 2);

        let texts = (0..5).map(|i| format!("text {i}")).collect();
        let embeddings = client.embed_documents(texts).await.unwrap();
        assert_eq!(embeddings.len(), 5);

        let query = client.embed_query("refunds").await.unwrap();
        assert_eq!(query, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_invalid_response() {
        let router = Router::new().route("/embed", post(|| async { Json(vec![vec![1.0f32; 3]]) }));
        let client = client_for(spawn(router).await, 384, 32);

        let err = client.embed_query("q").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_server_error_status() {
        let router = Router::new().route(
            "/embed",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "model loading") }),
        );
        let client = client_for(spawn(router).await, 2, 32);

        let err = client.embed_query("q").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::ServerError(ref m) if m.contains("503")));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let client = client_for("http://127.0.0.1:1".to_string(), 2, 32);
        assert!(client.health_check().await.is_err());
        assert!(client.embed_query("q").await.is_err());
    }
}
