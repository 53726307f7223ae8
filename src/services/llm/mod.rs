//! LLM gateway: one client per provider, dispatched by the request's provider tag.

mod gemini;
mod openai;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::{ConversationTurn, Prompt, Provider, ProvidersConfig};

pub use gemini::GeminiClient;
pub use openai::OpenAiCompatibleClient;

/// Everything a provider needs for one completion. The API key is per request
/// and never kept by the clients.
#[derive(Clone)]
pub struct CompletionRequest {
    pub api_key: String,
    pub system_message: String,
    pub prompt: String,
    pub history: Vec<ConversationTurn>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(api_key: impl Into<String>, prompt: &Prompt, temperature: f32, max_tokens: u32) -> Self {
        Self {
            api_key: api_key.into(),
            system_message: prompt.system.clone(),
            prompt: prompt.user.clone(),
            history: Vec::new(),
            temperature,
            max_tokens,
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }
}

impl std::fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("api_key", &"<redacted>")
            .field("system_message", &self.system_message)
            .field("prompt", &self.prompt)
            .field("history", &self.history.len())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider(&self) -> Provider;

    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

/// Routes completions to the configured provider clients.
#[derive(Clone, Default)]
pub struct LlmGateway {
    providers: HashMap<Provider, Arc<dyn LlmProvider>>,
}

impl LlmGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clients for every supported provider, using the configured endpoints.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self::new()
            .with_provider(Arc::new(OpenAiCompatibleClient::new(
                Provider::DeepSeek,
                config.endpoint(Provider::DeepSeek),
                timeout,
            )?))
            .with_provider(Arc::new(OpenAiCompatibleClient::new(
                Provider::OpenAi,
                config.endpoint(Provider::OpenAi),
                timeout,
            )?))
            .with_provider(Arc::new(GeminiClient::new(
                config.endpoint(Provider::Gemini),
                timeout,
            )?)))
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(provider.provider(), provider);
        self
    }

    pub fn model(&self, provider: Provider) -> Option<&str> {
        self.providers.get(&provider).map(|p| p.model())
    }

    pub async fn complete(
        &self,
        provider: Provider,
        request: &CompletionRequest,
    ) -> Result<String, ProviderError> {
        let client = self
            .providers
            .get(&provider)
            .ok_or_else(|| ProviderError::Unavailable {
                provider: provider.to_string(),
                message: "provider is not configured".to_string(),
            })?;

        tracing::debug!(
            provider = %provider,
            model = client.model(),
            history = request.history.len(),
            "sending completion request"
        );
        client.complete(request).await
    }
}

/// Classify a non-success provider response.
pub(crate) fn map_status(
    provider: Provider,
    status: u16,
    body: &str,
    timeout: Duration,
) -> ProviderError {
    let name = provider.to_string();
    let message = summarize_body(body, status);
    let lower = body.to_lowercase();

    match status {
        401 | 403 => ProviderError::Auth {
            provider: name,
            message,
        },
        400 if body.contains("API_KEY_INVALID") => ProviderError::Auth {
            provider: name,
            message,
        },
        429 => ProviderError::RateLimited {
            provider: name,
            message,
        },
        _ if lower.contains("quota") => ProviderError::RateLimited {
            provider: name,
            message,
        },
        408 | 504 => ProviderError::Timeout {
            provider: name,
            timeout_secs: timeout.as_secs(),
        },
        _ => ProviderError::Unavailable {
            provider: name,
            message,
        },
    }
}

/// Classify a transport failure.
pub(crate) fn map_transport(
    provider: Provider,
    error: reqwest::Error,
    timeout: Duration,
) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout {
            provider: provider.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    } else {
        ProviderError::Unavailable {
            provider: provider.to_string(),
            message: error.to_string(),
        }
    }
}

/// Prefer the `error.message` field providers put in JSON error bodies.
fn summarize_body(body: &str, status: u16) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v.pointer("/error/message").or_else(|| v.pointer("/message")))
        .and_then(|m| m.as_str())
        .map(str::to_string);

    match message {
        Some(m) => format!("HTTP {status}: {m}"),
        None if body.trim().is_empty() => format!("HTTP {status}"),
        None => format!("HTTP {status}: {}", crate::utils::preview(body, 200)),
    }
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Unavailable {
            provider: "http".to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::Router;

    pub async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    struct Echo;

    #[async_trait]
    impl LlmProvider for Echo {
        fn provider(&self) -> Provider {
            Provider::Gemini
        }

        fn model(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
            Ok(format!("echo: {}", request.prompt))
        }
    }

    fn request() -> CompletionRequest {
        let prompt = Prompt {
            system: "sys".into(),
            user: "hello".into(),
        };
        CompletionRequest::new("key", &prompt, 0.7, 100)
    }

    #[tokio::test]
    async fn test_gateway_dispatches_by_provider() {
        let gateway = LlmGateway::new().with_provider(Arc::new(Echo));
        let text = gateway.complete(Provider::Gemini, &request()).await.unwrap();
        assert_eq!(text, "echo: hello");
        assert_eq!(gateway.model(Provider::Gemini), Some("echo"));
    }

    #[tokio::test]
    async fn test_gateway_unconfigured_provider() {
        let gateway = LlmGateway::new();
        let err = gateway
            .complete(Provider::DeepSeek, &request())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    }

    #[test]
    fn test_from_config_registers_all_providers() {
        let gateway = LlmGateway::from_config(&ProvidersConfig::default()).unwrap();
        assert_eq!(gateway.model(Provider::DeepSeek), Some("deepseek-chat"));
        assert_eq!(gateway.model(Provider::OpenAi), Some("gpt-3.5-turbo"));
        assert_eq!(gateway.model(Provider::Gemini), Some("gemini-1.5-flash"));
    }

    #[test]
    fn test_map_status() {
        let kind = |status, body| {
            map_status(Provider::OpenAi, status, body, Duration::from_secs(60)).kind()
        };
        assert_eq!(kind(401, ""), ErrorKind::ProviderAuthError);
        assert_eq!(kind(403, ""), ErrorKind::ProviderAuthError);
        assert_eq!(
            kind(400, r#"{"error":{"details":[{"reason":"API_KEY_INVALID"}]}}"#),
            ErrorKind::ProviderAuthError
        );
        assert_eq!(kind(429, ""), ErrorKind::ProviderRateLimited);
        assert_eq!(
            kind(402, r#"{"error":{"message":"You exceeded your current quota"}}"#),
            ErrorKind::ProviderRateLimited
        );
        assert_eq!(kind(504, ""), ErrorKind::ProviderTimeout);
        assert_eq!(kind(500, "boom"), ErrorKind::ProviderUnavailable);
        assert_eq!(kind(400, "bad request"), ErrorKind::ProviderUnavailable);
    }

    #[test]
    fn test_summarize_body_prefers_error_message() {
        assert_eq!(
            summarize_body(r#"{"error":{"message":"Incorrect API key"}}"#, 401),
            "HTTP 401: Incorrect API key"
        );
        assert_eq!(summarize_body("", 502), "HTTP 502");
    }

    #[test]
    fn test_request_debug_redacts_key() {
        let debug = format!("{:?}", request());
        assert!(!debug.contains("\"key\""));
        assert!(debug.contains("<redacted>"));
    }
}
