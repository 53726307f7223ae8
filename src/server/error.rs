use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::{ChunkError, ErrorKind, IngestError, ProviderError, QueryError, VectorStoreError};
use crate::server::protocol::ErrorBody;

/// Every non-2xx response: a wire kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn collection_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::CollectionNotFound,
            format!("collection not found: {name}"),
        )
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.kind.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::warn!(error_kind = %self.kind, message = %self.message, "request failed");
        } else {
            tracing::debug!(error_kind = %self.kind, message = %self.message, "request rejected");
        }
        let body = ErrorBody {
            error_kind: self.kind.as_str().to_string(),
            message: self.message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

impl From<QueryError> for ApiError {
    fn from(error: QueryError) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

impl From<ProviderError> for ApiError {
    fn from(error: ProviderError) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

impl From<VectorStoreError> for ApiError {
    fn from(error: VectorStoreError) -> Self {
        Self::new(crate::error::vector_store_kind(&error), error.to_string())
    }
}

impl From<ChunkError> for ApiError {
    fn from(error: ChunkError) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_error_response_shape() {
        let response = ApiError::from(QueryError::CollectionNotFound("kb".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error_kind"], "collection_not_found");
        assert_eq!(body["message"], "collection not found: kb");
    }

    #[test]
    fn test_provider_errors_keep_their_kind() {
        let error = ApiError::from(ProviderError::RateLimited {
            provider: "openai".into(),
            message: "slow down".into(),
        });
        assert_eq!(error.kind, ErrorKind::ProviderRateLimited);
        assert_eq!(error.kind.status(), 429);
    }
}
