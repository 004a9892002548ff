pub mod auth;
pub mod client;
pub mod concurrency;
pub mod config;
pub mod documents;
pub mod error;
pub mod fhir;
pub mod format;
pub mod orchestrator;
pub mod registry;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use auth::{TokenManager, TokenRecord};
pub use client::{FhirApi, ResourceClient};
pub use concurrency::run_bounded;
pub use config::{ApiKeyHeader, AuthConfig, CompletionConfig, ExtractionConfig, FhirApiConfig};
pub use documents::{
    ChatCompletionClient, CompletionService, ConsolidatedSummary, DocumentDescriptor,
    DocumentPipeline, DocumentSummaryResult, HttpTextExtractor, PatientDocumentResult,
    PatientDocuments, PipelineOptions, TextExtractor, TokenUsage,
};
pub use error::{EhrError, ErrorKind, Result};
pub use format::{ResourcePayload, format_result};
pub use orchestrator::{FetchOutcome, ResourceFailure, ResourceOrchestrator, ResourceResult};
pub use registry::{IdentifierRequirement, RequestIdentifiers, ResourceKey};
