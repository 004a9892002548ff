use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::error_body;
use crate::config::{ApiKeyHeader, CompletionConfig};
use crate::error::{EhrError, Result};

/// Token counters reported by the completion service.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl std::ops::Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.saturating_add(other.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(other.completion_tokens),
            total_tokens: self.total_tokens.saturating_add(other.total_tokens),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// One system + user exchange with a chat model.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, system: &str, user: &str, temperature: f32) -> Result<Completion>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
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

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// OpenAI-compatible chat completions client (OpenAI, OpenRouter, Azure).
pub struct ChatCompletionClient {
    http_client: reqwest::Client,
    config: CompletionConfig,
}

impl ChatCompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EhrError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl CompletionService for ChatCompletionClient {
    async fn complete(&self, system: &str, user: &str, temperature: f32) -> Result<Completion> {
        let payload = ChatCompletionRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
            max_tokens: self.config.max_tokens,
        };
        debug!(model = %self.config.model, chars = user.len(), "Calling completion API");

        let request = self
            .http_client
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload);
        let request = match self.config.api_key_header {
            ApiKeyHeader::Bearer => request.bearer_auth(&self.config.api_key),
            ApiKeyHeader::ApiKey => request.header("api-key", &self.config.api_key),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            warn!("Completion API request failed: {}", status);
            return Err(EhrError::SummarizationFailure(format!(
                "completion API returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            EhrError::SummarizationFailure(format!("invalid completion response: {}", e))
        })?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| {
                EhrError::SummarizationFailure("completion API returned no content".to_string())
            })?;

        let usage = body.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        info!(
            total_tokens = usage.map(|u| u.total_tokens),
            "Generated completion ({} characters)",
            text.len()
        );

        Ok(Completion { text, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::spawn_server;
    use axum::{
        Json, Router,
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::post,
    };
    use serde_json::{Value, json};

    async fn chat(headers: HeaderMap, Json(body): Json<Value>) -> Response {
        let bearer_ok = headers.get("authorization").and_then(|v| v.to_str().ok())
            == Some("Bearer sk-test");
        let api_key_ok = headers.get("api-key").and_then(|v| v.to_str().ok()) == Some("sk-test");
        if !bearer_ok && !api_key_ok {
            return (StatusCode::UNAUTHORIZED, "bad key").into_response();
        }
        if body["messages"][0]["role"] != "system" || body["messages"][1]["role"] != "user" {
            return StatusCode::BAD_REQUEST.into_response();
        }

        let user = body["messages"][1]["content"].as_str().unwrap_or_default();
        if user.contains("EMPTY") {
            return Json(json!({ "choices": [{ "message": { "content": "   " } }] }))
                .into_response();
        }
        Json(json!({
            "choices": [{ "message": {
                "role": "assistant",
                "content": format!("summary at {}", body["temperature"])
            } }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150 }
        }))
        .into_response()
    }

    async fn client(header: ApiKeyHeader, key: &str) -> ChatCompletionClient {
        let base = spawn_server(Router::new().route("/v1/chat/completions", post(chat))).await;
        let mut config =
            CompletionConfig::new(format!("{}/v1/chat/completions", base), key, "gpt-4o-mini");
        config.api_key_header = header;
        ChatCompletionClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_completion_returns_text_and_usage() {
        let client = client(ApiKeyHeader::Bearer, "sk-test").await;

        let completion = client.complete("system", "note text", 0.25).await.unwrap();

        assert_eq!(completion.text, "summary at 0.25");
        assert_eq!(
            completion.usage,
            Some(TokenUsage {
                prompt_tokens: 120,
                completion_tokens: 30,
                total_tokens: 150
            })
        );
        assert_eq!(
            serde_json::to_value(completion.usage).unwrap()["promptTokens"],
            120
        );
    }

    #[tokio::test]
    async fn test_azure_style_api_key_header() {
        let client = client(ApiKeyHeader::ApiKey, "sk-test").await;
        assert!(client.complete("system", "note", 0.3).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejected_key_is_summarization_failure() {
        let client = client(ApiKeyHeader::Bearer, "sk-wrong").await;

        let err = client.complete("system", "note", 0.3).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SummarizationFailure);
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_blank_content_is_summarization_failure() {
        let client = client(ApiKeyHeader::Bearer, "sk-test").await;

        let err = client.complete("system", "EMPTY", 0.3).await.unwrap_err();
        assert!(matches!(err, EhrError::SummarizationFailure(_)));
    }

    #[test]
    fn test_usage_addition_saturates() {
        let huge = TokenUsage {
            prompt_tokens: u32::MAX,
            completion_tokens: 10,
            total_tokens: u32::MAX - 5,
        };
        let small = TokenUsage {
            prompt_tokens: 1,
            completion_tokens: 5,
            total_tokens: 10,
        };

        let sum = huge + small;
        assert_eq!(sum.prompt_tokens, u32::MAX);
        assert_eq!(sum.completion_tokens, 15);
        assert_eq!(sum.total_tokens, u32::MAX);
    }
}
