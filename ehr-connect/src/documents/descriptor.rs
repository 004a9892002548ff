use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fhir::{bundle_resources, concept_text, resource_type, text_at};

/// Reference to a remote attachment, projected from a DocumentReference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub document_type: String,
    #[serde(default)]
    pub date: Option<String>,
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl DocumentDescriptor {
    /// `None` when the resource is not a DocumentReference or has no
    /// attachment URL to download.
    pub fn from_document_reference(resource: &Value) -> Option<Self> {
        if resource_type(resource) != Some("DocumentReference") {
            return None;
        }

        let attachment = resource
            .get("content")?
            .as_array()?
            .iter()
            .filter_map(|content| content.get("attachment"))
            .find(|attachment| text_at(attachment, "/url").is_some())?;

        Some(Self {
            id: text_at(resource, "/id").unwrap_or_default(),
            document_type: concept_text(resource, "type")
                .or_else(|| text_at(attachment, "/title"))
                .unwrap_or_else(|| "Document".to_string()),
            date: text_at(resource, "/date")
                .or_else(|| text_at(resource, "/context/period/start")),
            url: text_at(attachment, "/url")?,
            content_type: text_at(attachment, "/contentType"),
        })
    }

    /// Resolve a relative attachment URL (`Binary/123`) against the API base.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            self.url = format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                self.url.trim_start_matches('/')
            );
        }
        self
    }
}

/// Every downloadable document in a DocumentReference bundle.
pub fn documents_from_bundle(bundle: &Value) -> Vec<DocumentDescriptor> {
    bundle_resources(bundle)
        .into_iter()
        .filter_map(DocumentDescriptor::from_document_reference)
        .collect()
}

/// Keep the `max` most recent documents, newest first. Undated documents
/// sort last.
pub fn most_recent(mut documents: Vec<DocumentDescriptor>, max: usize) -> Vec<DocumentDescriptor> {
    // ISO-8601 dates order lexicographically.
    documents.sort_by(|a, b| b.date.cmp(&a.date));
    documents.truncate(max);
    documents
}
