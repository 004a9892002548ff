//! Configuration injected by the embedding application.
//!
//! Nothing in this crate reads the environment; the service crate (or a test)
//! builds these structs and hands them to the clients.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_GRANT_TYPE: &str = "agency_auth";
pub const DEFAULT_SCOPE: &str = "openid HCHB.api.scope agency.identity hchb.identity";
pub const DEFAULT_REFRESH_BUFFER_SECS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 60;

fn default_grant_type() -> String {
    DEFAULT_GRANT_TYPE.to_string()
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_refresh_buffer_secs() -> u64 {
    DEFAULT_REFRESH_BUFFER_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_extraction_timeout_secs() -> u64 {
    DEFAULT_EXTRACTION_TIMEOUT_SECS
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    2000
}

/// Client-credentials settings for the token endpoint.
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    pub token_url: String,
    pub client_id: String,
    pub resource_security_id: String,
    pub agency_secret: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_grant_type")]
    pub grant_type: String,
    /// Tokens are refreshed this many seconds before they expire.
    #[serde(default = "default_refresh_buffer_secs")]
    pub refresh_buffer_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl AuthConfig {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        resource_security_id: impl Into<String>,
        agency_secret: impl Into<String>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            resource_security_id: resource_security_id.into(),
            agency_secret: agency_secret.into(),
            scope: default_scope(),
            grant_type: default_grant_type(),
            refresh_buffer_secs: DEFAULT_REFRESH_BUFFER_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    pub fn refresh_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_buffer_secs as i64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("resource_security_id", &self.resource_security_id)
            .field("agency_secret", &"<redacted>")
            .field("scope", &self.scope)
            .field("grant_type", &self.grant_type)
            .field("refresh_buffer_secs", &self.refresh_buffer_secs)
            .finish()
    }
}

/// Location of the FHIR API.
#[derive(Debug, Clone, Deserialize)]
pub struct FhirApiConfig {
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl FhirApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Location of the PDF text extraction service.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    pub base_url: String,
    #[serde(default = "default_extraction_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ExtractionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_secs: DEFAULT_EXTRACTION_TIMEOUT_SECS,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// How the completion API key is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ApiKeyHeader {
    /// `Authorization: Bearer <key>` (OpenAI, OpenRouter)
    #[default]
    Bearer,
    /// `api-key: <key>` (Azure OpenAI)
    ApiKey,
}

impl std::str::FromStr for ApiKeyHeader {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bearer" => Ok(ApiKeyHeader::Bearer),
            "api-key" | "azure" => Ok(ApiKeyHeader::ApiKey),
            other => Err(format!("unknown api key header style '{}'", other)),
        }
    }
}

/// Chat-completion endpoint used for summaries.
#[derive(Clone, Deserialize)]
pub struct CompletionConfig {
    /// Full URL of the chat completions endpoint.
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    #[serde(default)]
    pub api_key_header: ApiKeyHeader,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl CompletionConfig {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            api_key_header: ApiKeyHeader::default(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("api_key_header", &self.api_key_header)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}
