//! OpenAI chat-completions protocol, shared by OpenAI and DeepSeek.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CompletionRequest, LlmProvider, build_http_client, map_status, map_transport};
use crate::error::ProviderError;
use crate::models::{Provider, ProviderEndpoint, Role};

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiCompatibleClient {
    provider: Provider,
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OpenAiCompatibleClient {
    pub fn new(
        provider: Provider,
        endpoint: &ProviderEndpoint,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            provider,
            client: build_http_client(timeout)?,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            model: endpoint.model.clone(),
            timeout,
        })
    }

    fn messages<'a>(request: &'a CompletionRequest) -> Vec<ChatMessage<'a>> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        if !request.system_message.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.system_message,
            });
        }
        for turn in &request.history {
            messages.push(ChatMessage {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &turn.content,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });
        messages
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            messages: Self::messages(request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&request.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport(self.provider, e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(self.provider, status.as_u16(), &text, self.timeout));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| map_transport(self.provider, e, self.timeout))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ProviderError::Unavailable {
                provider: self.provider.to_string(),
                message: "empty completion".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{ConversationTurn, Prompt};
    use crate::services::llm::test_support::spawn;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    fn client(base_url: String) -> OpenAiCompatibleClient {
        OpenAiCompatibleClient::new(
            Provider::DeepSeek,
            &ProviderEndpoint {
                base_url,
                model: "deepseek-chat".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn request() -> CompletionRequest {
        let prompt = Prompt {
            system: "You are a helpful AI assistant.".into(),
            user: "What is the refund window?".into(),
        };
        CompletionRequest::new("sk-test", &prompt, 0.2, 64).with_history(vec![
            ConversationTurn {
                role: Role::User,
                content: "hi".into(),
            },
            ConversationTurn {
                role: Role::Assistant,
                content: "hello".into(),
            },
        ])
    }

    #[tokio::test]
    async fn test_complete_sends_messages_in_order() {
        let router = Router::new().route(
            "/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let roles: Vec<String> = body["messages"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|m| m["role"].as_str().unwrap().to_string())
                    .collect();
                let content = format!("{auth}|{}|{}", roles.join(","), body["model"]);
                Json(json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] }))
            }),
        );
        let base = spawn(router).await;

        let text = client(base).complete(&request()).await.unwrap();
        assert_eq!(
            text,
            "Bearer sk-test|system,user,assistant,user|\"deepseek-chat\""
        );
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (StatusCode::UNAUTHORIZED, ErrorKind::ProviderAuthError),
            (StatusCode::TOO_MANY_REQUESTS, ErrorKind::ProviderRateLimited),
            (StatusCode::GATEWAY_TIMEOUT, ErrorKind::ProviderTimeout),
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::ProviderUnavailable),
        ];

        for (status, expected) in cases {
            let router = Router::new().route(
                "/chat/completions",
                post(move || async move {
                    (status, Json(json!({ "error": { "message": "nope" } })))
                }),
            );
            let base = spawn(router).await;
            let err = client(base).complete(&request()).await.unwrap_err();
            assert_eq!(err.kind(), expected, "status {status}");
        }
    }

    #[tokio::test]
    async fn test_empty_completion_is_unavailable() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { Json(json!({ "choices": [] })) }),
        );
        let base = spawn(router).await;
        let err = client(base).complete(&request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    }

    #[tokio::test]
    async fn test_client_timeout() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({}))
            }),
        );
        let base = spawn(router).await;
        let client = OpenAiCompatibleClient::new(
            Provider::OpenAi,
            &ProviderEndpoint {
                base_url: base,
                model: "gpt-3.5-turbo".to_string(),
            },
            Duration::from_millis(200),
        )
        .unwrap();

        let err = client.complete(&request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderTimeout);
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let err = client("http://127.0.0.1:1".to_string())
            .complete(&request())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    }
}
