use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while talking to the EHR API and the document services.
#[derive(Error, Debug, Clone)]
pub enum EhrError {
    /// Token acquisition failed, or a call was rejected with 401 twice in a row.
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("Remote request failed with status {status}: {body}")]
    RemoteRequestFailure { status: u16, body: String },

    #[error("Unsupported resource type: {0}")]
    UnsupportedResourceType(String),

    #[error("{key} requires a {identifier} identifier")]
    MissingIdentifier { key: String, identifier: String },

    #[error("Text extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("Summarization failed: {0}")]
    SummarizationFailure(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(Arc<reqwest::Error>),

    #[error("Invalid response payload: {0}")]
    Json(Arc<serde_json::Error>),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for EhrError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EhrError::Timeout(err.to_string())
        } else {
            EhrError::Network(Arc::new(err))
        }
    }
}

impl From<serde_json::Error> for EhrError {
    fn from(err: serde_json::Error) -> Self {
        EhrError::Json(Arc::new(err))
    }
}

/// Coarse error category attached to per-key and per-document failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthenticationFailure,
    RemoteRequestFailure,
    UnsupportedResourceType,
    MissingIdentifier,
    ExtractionFailure,
    SummarizationFailure,
    InvalidRequest,
    Timeout,
    Network,
    InvalidResponse,
    Configuration,
}

impl EhrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EhrError::AuthenticationFailure(_) => ErrorKind::AuthenticationFailure,
            EhrError::RemoteRequestFailure { .. } => ErrorKind::RemoteRequestFailure,
            EhrError::UnsupportedResourceType(_) => ErrorKind::UnsupportedResourceType,
            EhrError::MissingIdentifier { .. } => ErrorKind::MissingIdentifier,
            EhrError::ExtractionFailure(_) => ErrorKind::ExtractionFailure,
            EhrError::SummarizationFailure(_) => ErrorKind::SummarizationFailure,
            EhrError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            EhrError::Timeout(_) => ErrorKind::Timeout,
            EhrError::Network(_) => ErrorKind::Network,
            EhrError::Json(_) => ErrorKind::InvalidResponse,
            EhrError::Config(_) => ErrorKind::Configuration,
        }
    }

    /// True when the platform itself could not be reached (DNS, refused
    /// connection), as opposed to a failure reported by the remote side.
    pub fn is_connectivity(&self) -> bool {
        match self {
            EhrError::Network(err) => err.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EhrError>;
