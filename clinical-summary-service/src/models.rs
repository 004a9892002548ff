use ehr_connect::{
    IdentifierRequirement, PatientDocumentResult, PatientDocuments, ResourceFailure, ResourceKey,
    ResourceResult,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize)]
pub struct ResourceDescription {
    pub key: String,
    pub label: String,
    pub identifier: String,
    pub needs_ai_summary: bool,
    pub is_document: bool,
}

impl From<ResourceKey> for ResourceDescription {
    fn from(key: ResourceKey) -> Self {
        Self {
            key: key.as_str().to_string(),
            label: key.label().to_string(),
            identifier: match key.identifier() {
                IdentifierRequirement::None => "none".to_string(),
                other => other.to_string(),
            },
            needs_ai_summary: key.needs_ai_summary(),
            is_document: key.is_document(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchResourcesRequest {
    pub patient_id: Option<String>,
    pub worker_id: Option<String>,
    pub resource_keys: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchResourcesResponse {
    pub results: HashMap<String, ResourceResult>,
    pub errors: Vec<ResourceFailure>,
    pub requested: usize,
    pub retrieved: usize,
    /// Display lines for every retrieved key.
    pub rendered: HashMap<String, Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummarizeDocumentsRequest {
    pub patients: Vec<PatientDocuments>,
    pub max_docs_per_patient: Option<usize>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchTotals {
    pub patients: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub consolidated: usize,
}

impl BatchTotals {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a PatientDocumentResult>) -> Self {
        results
            .into_iter()
            .fold(BatchTotals::default(), |mut totals, result| {
                totals.patients += 1;
                totals.succeeded += result.succeeded;
                totals.failed += result.failed;
                totals.consolidated += usize::from(result.consolidated.is_some());
                totals
            })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummarizeDocumentsResponse {
    pub patients: HashMap<String, PatientDocumentResult>,
    pub totals: BatchTotals,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PatientSummaryRequest {
    /// Document resource keys to pull. Defaults to every document key.
    pub document_keys: Option<Vec<String>>,
    pub max_docs: Option<usize>,
    pub context: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PatientSummaryResponse {
    pub patient_id: String,
    pub documents_found: usize,
    pub fetch_errors: Vec<ResourceFailure>,
    pub result: PatientDocumentResult,
}
