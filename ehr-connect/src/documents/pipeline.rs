//! Two-tier document summarization.
//!
//! Each document goes extract → summarize independently. Once a patient's
//! documents have all settled, two or more successful summaries are folded
//! into one consolidated overview with a single extra completion call; a lone
//! summary is reused as-is. Patients are processed under a concurrency bound
//! so the extraction and completion services never see more than
//! `concurrency` patients' work at once.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use super::completion::{Completion, CompletionService, TokenUsage};
use super::descriptor::{DocumentDescriptor, most_recent};
use super::extraction::{ExtractedText, TextExtractor};
use super::prompts::{
    CONSOLIDATION_SYSTEM_PROMPT, DOCUMENT_SYSTEM_PROMPT, consolidation_prompt, document_prompt,
    truncate_for_prompt,
};
use crate::concurrency::run_bounded;
use crate::error::{EhrError, ErrorKind, Result};

pub const DEFAULT_MAX_DOCS_PER_PATIENT: usize = 5;
pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_MAX_INPUT_CHARS: usize = 60_000;

fn default_max_docs_per_patient() -> usize {
    DEFAULT_MAX_DOCS_PER_PATIENT
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_max_input_chars() -> usize {
    DEFAULT_MAX_INPUT_CHARS
}

fn default_temperature() -> f32 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOptions {
    #[serde(default = "default_max_docs_per_patient")]
    pub max_docs_per_patient: usize,
    /// Patients processed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Extracted text beyond this many characters is cut before summarizing.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_temperature")]
    pub summary_temperature: f32,
    #[serde(default = "default_temperature")]
    pub consolidation_temperature: f32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_docs_per_patient: DEFAULT_MAX_DOCS_PER_PATIENT,
            concurrency: DEFAULT_CONCURRENCY,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            summary_temperature: default_temperature(),
            consolidation_temperature: default_temperature(),
        }
    }
}

/// Input for one patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientDocuments {
    pub id: String,
    /// Short free text (age, primary diagnosis) given to the consolidation
    /// prompt.
    #[serde(default)]
    pub context: Option<String>,
    pub documents: Vec<DocumentDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummaryResult {
    pub document_id: String,
    pub document_type: String,
    pub document_date: Option<String>,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub usage: Option<TokenUsage>,
}

impl DocumentSummaryResult {
    fn succeeded(document: &DocumentDescriptor, completion: Completion) -> Self {
        Self {
            document_id: document.id.clone(),
            document_type: document.document_type.clone(),
            document_date: document.date.clone(),
            summary: Some(completion.text),
            error: None,
            error_kind: None,
            usage: completion.usage,
        }
    }

    fn failed(document: &DocumentDescriptor, err: &EhrError) -> Self {
        Self {
            document_id: document.id.clone(),
            document_type: document.document_type.clone(),
            document_date: document.date.clone(),
            summary: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            usage: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.summary.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedSummary {
    pub summary: String,
    pub document_count: usize,
    /// `None` when no consolidation call was made.
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientDocumentResult {
    pub patient_id: String,
    /// One entry per processed document, newest first.
    pub documents: Vec<DocumentSummaryResult>,
    pub consolidated: Option<ConsolidatedSummary>,
    /// Set when two or more summaries existed but the consolidation call
    /// failed. Individual summaries are still returned.
    pub consolidation_error: Option<String>,
    pub succeeded: usize,
    pub failed: usize,
}

impl PatientDocumentResult {
    /// Token usage across every completion call made for this patient.
    pub fn total_usage(&self) -> Option<TokenUsage> {
        self.documents
            .iter()
            .filter_map(|d| d.usage)
            .chain(self.consolidated.as_ref().and_then(|c| c.usage))
            .reduce(|a, b| a + b)
    }
}

pub struct DocumentPipeline {
    extractor: Arc<dyn TextExtractor>,
    completions: Arc<dyn CompletionService>,
    options: PipelineOptions,
}

impl DocumentPipeline {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        completions: Arc<dyn CompletionService>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            extractor,
            completions,
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub async fn extract_text(&self, url: &str) -> Result<ExtractedText> {
        if url.trim().is_empty() {
            return Err(EhrError::ExtractionFailure(
                "document has no attachment url".to_string(),
            ));
        }
        self.extractor.extract_text(url).await
    }

    pub async fn summarize(&self, text: &str, document_type: &str) -> Result<Completion> {
        let text = truncate_for_prompt(text, self.options.max_input_chars);
        self.completions
            .complete(
                DOCUMENT_SYSTEM_PROMPT,
                &document_prompt(document_type, &text),
                self.options.summary_temperature,
            )
            .await
    }

    /// Extract then summarize one document. Never fails: errors are recorded
    /// on the result.
    pub async fn summarize_document(&self, document: &DocumentDescriptor) -> DocumentSummaryResult {
        let outcome: Result<Completion> = async {
            let extracted = self.extract_text(&document.url).await?;
            self.summarize(&extracted.text, &document.document_type).await
        }
        .await;

        match outcome {
            Ok(completion) => DocumentSummaryResult::succeeded(document, completion),
            Err(err) => {
                warn!(document_id = %document.id, error = %err, "Document summary failed");
                DocumentSummaryResult::failed(document, &err)
            }
        }
    }

    pub async fn summarize_patient(
        &self,
        patient: &PatientDocuments,
        max_docs: usize,
    ) -> PatientDocumentResult {
        let documents = most_recent(patient.documents.clone(), max_docs);
        info!(
            patient_id = %patient.id,
            "Summarizing {} of {} documents",
            documents.len(),
            patient.documents.len()
        );

        let results = join_all(documents.iter().map(|doc| self.summarize_document(doc))).await;

        let successes: Vec<(&DocumentDescriptor, &str)> = documents
            .iter()
            .zip(&results)
            .filter_map(|(doc, result)| result.summary.as_deref().map(|s| (doc, s)))
            .collect();

        let (consolidated, consolidation_error) = match successes.as_slice() {
            [] => (None, None),
            [(_, only)] => (
                Some(ConsolidatedSummary {
                    summary: only.to_string(),
                    document_count: 1,
                    usage: None,
                }),
                None,
            ),
            many => match self.consolidate(patient.context.as_deref(), many).await {
                Ok(summary) => (Some(summary), None),
                Err(err) => {
                    warn!(patient_id = %patient.id, error = %err, "Consolidation failed");
                    (None, Some(err.to_string()))
                }
            },
        };

        let succeeded = successes.len();
        let failed = results.len() - succeeded;
        info!(
            patient_id = %patient.id,
            succeeded,
            failed,
            consolidated = consolidated.is_some(),
            "Patient documents processed"
        );

        PatientDocumentResult {
            patient_id: patient.id.clone(),
            documents: results,
            consolidated,
            consolidation_error,
            succeeded,
            failed,
        }
    }

    async fn consolidate(
        &self,
        context: Option<&str>,
        summaries: &[(&DocumentDescriptor, &str)],
    ) -> Result<ConsolidatedSummary> {
        let completion = self
            .completions
            .complete(
                CONSOLIDATION_SYSTEM_PROMPT,
                &consolidation_prompt(context, summaries),
                self.options.consolidation_temperature,
            )
            .await?;

        Ok(ConsolidatedSummary {
            summary: completion.text,
            document_count: summaries.len(),
            usage: completion.usage,
        })
    }

    /// Summarize every patient's documents with at most `concurrency`
    /// patients in flight. Never fails: per-document and consolidation
    /// failures are recorded on each patient's result. A repeated patient id
    /// is processed once.
    pub async fn batch_summarize(
        &self,
        patients: Vec<PatientDocuments>,
        max_docs_per_patient: usize,
        concurrency: usize,
    ) -> HashMap<String, PatientDocumentResult> {
        let mut seen = HashSet::new();
        let patients: Vec<PatientDocuments> = patients
            .into_iter()
            .filter(|p| {
                let first = seen.insert(p.id.clone());
                if !first {
                    warn!(patient_id = %p.id, "Skipping repeated patient");
                }
                first
            })
            .collect();

        info!(
            patients = patients.len(),
            concurrency, "Starting batch document summarization"
        );

        let results = run_bounded(patients, concurrency, |patient| async move {
            self.summarize_patient(&patient, max_docs_per_patient).await
        })
        .await;

        results
            .into_iter()
            .map(|result| (result.patient_id.clone(), result))
            .collect()
    }

    /// `batch_summarize` with the configured limits.
    pub async fn batch_summarize_default(
        &self,
        patients: Vec<PatientDocuments>,
    ) -> HashMap<String, PatientDocumentResult> {
        self.batch_summarize(
            patients,
            self.options.max_docs_per_patient,
            self.options.concurrency,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeExtractor {
        failing: HashSet<String>,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeExtractor {
        fn failing(urls: &[&str]) -> Self {
            Self {
                failing: urls.iter().map(|u| u.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl TextExtractor for FakeExtractor {
        async fn extract_text(&self, url: &str) -> Result<ExtractedText> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(url) {
                return Err(EhrError::ExtractionFailure("unreadable attachment".into()));
            }
            let text = format!("Findings for {}", url);
            Ok(ExtractedText {
                success: true,
                char_count: text.len(),
                text,
                page_count: 1,
                used_vision_ocr: false,
            })
        }
    }

    #[derive(Default)]
    struct FakeCompletions {
        fail_consolidation: bool,
        document_calls: AtomicUsize,
        consolidation_prompts: Mutex<Vec<String>>,
        document_prompts: Mutex<Vec<String>>,
    }

    fn usage(total: u32) -> Option<TokenUsage> {
        Some(TokenUsage {
            prompt_tokens: total - 10,
            completion_tokens: 10,
            total_tokens: total,
        })
    }

    #[async_trait]
    impl CompletionService for FakeCompletions {
        async fn complete(&self, system: &str, user: &str, _temperature: f32) -> Result<Completion> {
            if system == CONSOLIDATION_SYSTEM_PROMPT {
                self.consolidation_prompts
                    .lock()
                    .unwrap()
                    .push(user.to_string());
                if self.fail_consolidation {
                    return Err(EhrError::SummarizationFailure("model overloaded".into()));
                }
                return Ok(Completion {
                    text: "Consolidated overview".to_string(),
                    usage: usage(300),
                });
            }

            self.document_calls.fetch_add(1, Ordering::SeqCst);
            self.document_prompts.lock().unwrap().push(user.to_string());
            let findings = user
                .lines()
                .find(|line| line.starts_with("Findings for "))
                .unwrap_or("nothing");
            Ok(Completion {
                text: format!("Summary of {}", findings),
                usage: usage(100),
            })
        }
    }

    fn doc(id: &str, date: &str) -> DocumentDescriptor {
        DocumentDescriptor {
            id: id.to_string(),
            document_type: "Visit Note".to_string(),
            date: Some(date.to_string()),
            url: format!("https://ehr.example/Binary/{}", id),
            content_type: Some("application/pdf".to_string()),
        }
    }

    fn patient(id: &str, documents: Vec<DocumentDescriptor>) -> PatientDocuments {
        PatientDocuments {
            id: id.to_string(),
            context: Some("82 y/o with CHF".to_string()),
            documents,
        }
    }

    fn pipeline(
        extractor: FakeExtractor,
        completions: Arc<FakeCompletions>,
    ) -> DocumentPipeline {
        DocumentPipeline::new(
            Arc::new(extractor),
            completions,
            PipelineOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_no_successes_yields_no_consolidation() {
        let completions = Arc::new(FakeCompletions::default());
        let pipeline = pipeline(
            FakeExtractor::failing(&[
                "https://ehr.example/Binary/D1",
                "https://ehr.example/Binary/D2",
            ]),
            completions.clone(),
        );

        let result = pipeline
            .summarize_patient(
                &patient("P001", vec![doc("D1", "2025-01-10"), doc("D2", "2025-01-09")]),
                5,
            )
            .await;

        assert!(result.consolidated.is_none());
        assert!(result.consolidation_error.is_none());
        assert_eq!((result.succeeded, result.failed), (0, 2));
        assert!(result.documents.iter().all(|d| {
            d.summary.is_none() && d.error_kind == Some(ErrorKind::ExtractionFailure)
        }));
        assert_eq!(completions.document_calls.load(Ordering::SeqCst), 0);
        assert!(completions.consolidation_prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_success_is_reused_verbatim() {
        let completions = Arc::new(FakeCompletions::default());
        let pipeline = pipeline(
            FakeExtractor::failing(&["https://ehr.example/Binary/D2"]),
            completions.clone(),
        );

        let result = pipeline
            .summarize_patient(
                &patient("P001", vec![doc("D1", "2025-01-10"), doc("D2", "2025-01-09")]),
                5,
            )
            .await;

        let consolidated = result.consolidated.unwrap();
        assert_eq!(
            Some(consolidated.summary.as_str()),
            result.documents[0].summary.as_deref()
        );
        assert_eq!(consolidated.document_count, 1);
        assert!(consolidated.usage.is_none());
        assert!(completions.consolidation_prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_extraction_is_left_out_of_consolidation() {
        let completions = Arc::new(FakeCompletions::default());
        let pipeline = pipeline(
            FakeExtractor::failing(&["https://ehr.example/Binary/D2"]),
            completions.clone(),
        );

        let result = pipeline
            .summarize_patient(
                &patient(
                    "P001",
                    vec![
                        doc("D1", "2025-01-10"),
                        doc("D2", "2025-01-09"),
                        doc("D3", "2025-01-08"),
                    ],
                ),
                5,
            )
            .await;

        let ids: Vec<&str> = result.documents.iter().map(|d| d.document_id.as_str()).collect();
        assert_eq!(ids, vec!["D1", "D2", "D3"]);
        assert!(result.documents[0].is_success());
        assert!(result.documents[1].error.is_some());
        assert!(result.documents[1].summary.is_none());
        assert!(result.documents[2].is_success());

        let consolidated = result.consolidated.clone().unwrap();
        assert_eq!(consolidated.summary, "Consolidated overview");
        assert_eq!(consolidated.document_count, 2);

        let prompts = completions.consolidation_prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Patient context: 82 y/o with CHF"));
        assert!(prompts[0].contains("Document 1: Visit Note (2025-01-10)"));
        assert!(prompts[0].contains("Document 2: Visit Note (2025-01-08)"));
        assert!(prompts[0].contains("Binary/D3"));
        assert!(!prompts[0].contains("Binary/D2"));

        // Two document calls plus the consolidation call.
        assert_eq!(result.total_usage().map(|u| u.total_tokens), Some(500));
    }

    #[tokio::test]
    async fn test_consolidation_failure_keeps_individual_summaries() {
        let completions = Arc::new(FakeCompletions {
            fail_consolidation: true,
            ..FakeCompletions::default()
        });
        let pipeline = pipeline(FakeExtractor::default(), completions.clone());

        let result = pipeline
            .summarize_patient(
                &patient("P001", vec![doc("D1", "2025-01-10"), doc("D2", "2025-01-09")]),
                5,
            )
            .await;

        assert!(result.consolidated.is_none());
        assert!(
            result
                .consolidation_error
                .as_deref()
                .is_some_and(|e| e.contains("model overloaded"))
        );
        assert_eq!(result.succeeded, 2);
        assert!(result.documents.iter().all(DocumentSummaryResult::is_success));
    }

    #[tokio::test]
    async fn test_only_most_recent_documents_are_processed() {
        let completions = Arc::new(FakeCompletions::default());
        let pipeline = pipeline(FakeExtractor::default(), completions.clone());
        let documents = (1..=7)
            .map(|day| doc(&format!("D{}", day), &format!("2025-01-0{}", day)))
            .collect();

        let result = pipeline
            .summarize_patient(&patient("P001", documents), 5)
            .await;

        let ids: Vec<&str> = result.documents.iter().map(|d| d.document_id.as_str()).collect();
        assert_eq!(ids, vec!["D7", "D6", "D5", "D4", "D3"]);
        assert_eq!(completions.document_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_long_text_is_truncated_before_summarizing() {
        let completions = Arc::new(FakeCompletions::default());
        let pipeline = DocumentPipeline::new(
            Arc::new(FakeExtractor::default()),
            completions.clone(),
            PipelineOptions {
                max_input_chars: 12,
                ..PipelineOptions::default()
            },
        );

        pipeline.summarize(&"x".repeat(100), "Visit Note").await.unwrap();

        let prompts = completions.document_prompts.lock().unwrap();
        assert!(prompts[0].contains(&format!("{}\n\n[Document truncated]", "x".repeat(12))));
        assert!(!prompts[0].contains(&"x".repeat(13)));
    }

    #[tokio::test]
    async fn test_missing_url_fails_without_calling_extractor() {
        let extractor = Arc::new(FakeExtractor::default());
        let pipeline = DocumentPipeline::new(
            extractor.clone(),
            Arc::new(FakeCompletions::default()),
            PipelineOptions::default(),
        );
        let mut document = doc("D1", "2025-01-10");
        document.url = String::new();

        let result = pipeline.summarize_document(&document).await;

        assert_eq!(result.error_kind, Some(ErrorKind::ExtractionFailure));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_bounds_patients_in_flight() {
        let extractor = Arc::new(FakeExtractor {
            delay: Duration::from_millis(100),
            ..FakeExtractor::default()
        });
        let pipeline = DocumentPipeline::new(
            extractor.clone(),
            Arc::new(FakeCompletions::default()),
            PipelineOptions::default(),
        );
        // One document each, so in-flight extractions equal in-flight patients.
        let patients: Vec<PatientDocuments> = (1..=7)
            .map(|n| patient(&format!("P{:03}", n), vec![doc(&format!("D{}", n), "2025-01-10")]))
            .collect();

        let results = pipeline.batch_summarize(patients, 5, 3).await;

        assert_eq!(results.len(), 7);
        assert!(results.values().all(|r| r.succeeded == 1));
        assert_eq!(extractor.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_batch_processes_repeated_patient_once() {
        let extractor = Arc::new(FakeExtractor::default());
        let pipeline = DocumentPipeline::new(
            extractor.clone(),
            Arc::new(FakeCompletions::default()),
            PipelineOptions::default(),
        );

        let results = pipeline
            .batch_summarize_default(vec![
                patient("P001", vec![doc("D1", "2025-01-10")]),
                patient("P001", vec![doc("D2", "2025-01-10")]),
            ])
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results["P001"].documents[0].document_id, "D1");
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }
}
