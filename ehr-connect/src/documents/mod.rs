pub mod completion;
pub mod descriptor;
pub mod extraction;
pub mod pipeline;
pub mod prompts;

pub use completion::{ChatCompletionClient, Completion, CompletionService, TokenUsage};
pub use descriptor::{DocumentDescriptor, documents_from_bundle, most_recent};
pub use extraction::{ExtractedText, HttpTextExtractor, TextExtractor};
pub use pipeline::{
    ConsolidatedSummary, DocumentPipeline, DocumentSummaryResult, PatientDocumentResult,
    PatientDocuments, PipelineOptions,
};
