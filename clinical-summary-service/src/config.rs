//! Environment-driven configuration for the service and its binaries.

use ehr_connect::{
    ApiKeyHeader, AuthConfig, CompletionConfig, ExtractionConfig, FhirApiConfig, PipelineOptions,
};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} environment variable must be set")]
    Missing(&'static str),

    #[error("{var} has an invalid value: {reason}")]
    Invalid { var: &'static str, reason: String },
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn required(lookup: Lookup, var: &'static str) -> Result<String, ConfigError> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(var))
}

fn optional(lookup: Lookup, var: &str) -> Option<String> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T>(lookup: Lookup, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional(lookup, var)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Token endpoint credentials and FHIR base URL.
#[derive(Debug, Clone)]
pub struct EhrSettings {
    pub auth: AuthConfig,
    pub fhir: FhirApiConfig,
}

impl EhrSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|var: &str| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: Lookup) -> Result<Self, ConfigError> {
        let mut auth = AuthConfig::new(
            required(lookup, "EHR_TOKEN_URL")?,
            required(lookup, "EHR_CLIENT_ID")?,
            required(lookup, "EHR_RESOURCE_SECURITY_ID")?,
            required(lookup, "EHR_AGENCY_SECRET")?,
        );
        if let Some(scope) = optional(lookup, "EHR_SCOPE") {
            auth.scope = scope;
        }
        if let Some(grant_type) = optional(lookup, "EHR_GRANT_TYPE") {
            auth.grant_type = grant_type;
        }

        let mut fhir = FhirApiConfig::new(required(lookup, "EHR_API_BASE_URL")?);
        if let Some(timeout) = parsed(lookup, "EHR_REQUEST_TIMEOUT_SECS")? {
            fhir.request_timeout_secs = timeout;
            auth.request_timeout_secs = timeout;
        }

        Ok(Self { auth, fhir })
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub ehr: EhrSettings,
    pub extraction: ExtractionConfig,
    pub completion: CompletionConfig,
    pub pipeline: PipelineOptions,
    pub port: u16,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|var: &str| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: Lookup) -> Result<Self, ConfigError> {
        let ehr = EhrSettings::from_lookup(lookup)?;
        let extraction = ExtractionConfig::new(required(lookup, "EXTRACTION_SERVICE_URL")?);

        let mut completion = CompletionConfig::new(
            required(lookup, "COMPLETION_ENDPOINT")?,
            required(lookup, "COMPLETION_API_KEY")?,
            required(lookup, "COMPLETION_MODEL")?,
        );
        if let Some(header) = parsed::<ApiKeyHeader>(lookup, "COMPLETION_API_KEY_HEADER")? {
            completion.api_key_header = header;
        }

        let mut pipeline = PipelineOptions::default();
        if let Some(max_docs) = parsed(lookup, "MAX_DOCS_PER_PATIENT")? {
            pipeline.max_docs_per_patient = max_docs;
        }
        if let Some(concurrency) = parsed(lookup, "PIPELINE_CONCURRENCY")? {
            pipeline.concurrency = concurrency;
        }

        Ok(Self {
            ehr,
            extraction,
            completion,
            pipeline,
            port: parsed(lookup, "PORT")?.unwrap_or(DEFAULT_PORT),
        })
    }
}
