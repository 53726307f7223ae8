//! Google Gemini `generateContent`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CompletionRequest, LlmProvider, build_http_client, map_status, map_transport};
use crate::error::ProviderError;
use crate::models::{Provider, ProviderEndpoint, Role};

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(endpoint: &ProviderEndpoint, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            model: endpoint.model.clone(),
            timeout,
        })
    }

    fn body<'a>(request: &'a CompletionRequest) -> GenerateRequest<'a> {
        let system_instruction = (!request.system_message.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: &request.system_message,
            }],
        });

        let mut contents: Vec<Content<'a>> = request
            .history
            .iter()
            .map(|turn| Content {
                role: Some(match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                }),
                parts: vec![Part {
                    text: &turn.content,
                }],
            })
            .collect();
        contents.push(Content {
            role: Some("user"),
            parts: vec![Part {
                text: &request.prompt,
            }],
        });

        GenerateRequest {
            system_instruction,
            contents,
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &request.api_key)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(|e| map_transport(Provider::Gemini, e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(Provider::Gemini, status.as_u16(), &text, self.timeout));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| map_transport(Provider::Gemini, e, self.timeout))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::Unavailable {
                provider: Provider::Gemini.to_string(),
                message: "Gemini returned an empty response".to_string(),
            });
        }
        Ok(text)
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

    fn client(base_url: String) -> GeminiClient {
        GeminiClient::new(
            &ProviderEndpoint {
                base_url,
                model: "gemini-1.5-flash".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn request() -> CompletionRequest {
        let prompt = Prompt {
            system: "Be concise.".into(),
            user: "Summarize the policy".into(),
        };
        CompletionRequest::new("g-key", &prompt, 0.5, 256).with_history(vec![ConversationTurn {
            role: Role::Assistant,
            content: "Earlier answer".into(),
        }])
    }

    #[test]
    fn test_body_shape() {
        let request = request();
        let body = serde_json::to_value(GeminiClient::body(&request)).unwrap();

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be concise.");
        assert_eq!(body["contents"][0]["role"], "model");
        assert_eq!(body["contents"][1]["role"], "user");
        assert_eq!(body["contents"][1]["parts"][0]["text"], "Summarize the policy");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[tokio::test]
    async fn test_complete_joins_parts() {
        let router = Router::new().route(
            "/models/{action}",
            post(|headers: HeaderMap| async move {
                assert_eq!(
                    headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()),
                    Some("g-key")
                );
                Json(json!({
                    "candidates": [{ "content": { "parts": [{ "text": "Refunds " }, { "text": "take 30 days." }] } }]
                }))
            }),
        );
        let base = spawn(router).await;

        let text = client(base).complete(&request()).await.unwrap();
        assert_eq!(text, "Refunds take 30 days.");
    }

    #[tokio::test]
    async fn test_invalid_key_is_auth_error() {
        let router = Router::new().route(
            "/models/{action}",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": {
                            "code": 400,
                            "message": "API key not valid. Please pass a valid API key.",
                            "status": "INVALID_ARGUMENT",
                            "details": [{ "reason": "API_KEY_INVALID" }]
                        }
                    })),
                )
            }),
        );
        let base = spawn(router).await;

        let err = client(base).complete(&request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderAuthError);
        assert!(err.to_string().contains("API key not valid"));
    }

    #[tokio::test]
    async fn test_quota_is_rate_limited() {
        let router = Router::new().route(
            "/models/{action}",
            post(|Json(_): Json<Value>| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": { "message": "Resource has been exhausted (e.g. check quota)." } })),
                )
            }),
        );
        let base = spawn(router).await;

        let err = client(base).complete(&request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderRateLimited);
    }

    #[tokio::test]
    async fn test_empty_candidates_is_unavailable() {
        let router = Router::new().route(
            "/models/{action}",
            post(|| async { Json(json!({ "candidates": [] })) }),
        );
        let base = spawn(router).await;

        let err = client(base).complete(&request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    }
}
