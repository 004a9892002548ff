use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::TokenManager;
use crate::client::{error_body, send_with_reauth};
use crate::config::ExtractionConfig;
use crate::error::{EhrError, Result};

/// Text pulled out of one attachment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedText {
    pub success: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub page_count: u32,
    #[serde(default)]
    pub char_count: usize,
    #[serde(default)]
    pub used_vision_ocr: bool,
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Download the attachment at `url` and return its text. Empty text is an
    /// `ExtractionFailure`.
    async fn extract_text(&self, url: &str) -> Result<ExtractedText>;
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    success: bool,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    page_count: u32,
    #[serde(default)]
    char_count: Option<usize>,
    #[serde(default)]
    used_vision_ocr: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the PDF text extraction service. The attachment itself sits
/// behind the EHR's auth, so every request carries the current EHR token.
pub struct HttpTextExtractor {
    http_client: reqwest::Client,
    endpoint: String,
    tokens: Arc<TokenManager>,
}

impl HttpTextExtractor {
    pub fn new(config: &ExtractionConfig, tokens: Arc<TokenManager>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EhrError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: format!(
                "{}/documents/extract-text",
                config.base_url.trim_end_matches('/')
            ),
            tokens,
        })
    }
}

#[async_trait]
impl TextExtractor for HttpTextExtractor {
    async fn extract_text(&self, url: &str) -> Result<ExtractedText> {
        info!("Extracting text from {}", url);

        // 401 here means the attachment download was refused with our token.
        let response = send_with_reauth(&self.tokens, |token| {
            self.http_client
                .post(&self.endpoint)
                .bearer_auth(token)
                .json(&json!({ "url": url, "token": token }))
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            let detail = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);
            warn!("Extraction service returned {} for {}", status, url);
            return Err(EhrError::ExtractionFailure(format!(
                "extraction service returned {}: {}",
                status.as_u16(),
                detail
            )));
        }

        let body: ExtractionResponse = response.json().await.map_err(|e| {
            EhrError::ExtractionFailure(format!("invalid extraction response: {}", e))
        })?;

        if !body.success {
            return Err(EhrError::ExtractionFailure(
                body.error
                    .unwrap_or_else(|| "extraction reported failure".to_string()),
            ));
        }

        let text = body.text.unwrap_or_default();
        if text.trim().is_empty() {
            warn!("No text extracted from {}", url);
            return Err(EhrError::ExtractionFailure("no text extracted".to_string()));
        }

        info!(
            pages = body.page_count,
            vision_ocr = body.used_vision_ocr,
            "Extracted {} characters",
            text.len()
        );
        Ok(ExtractedText {
            success: true,
            char_count: body.char_count.unwrap_or_else(|| text.chars().count()),
            text,
            page_count: body.page_count,
            used_vision_ocr: body.used_vision_ocr,
        })
    }
}
