use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::client::FhirApi;
use crate::error::{EhrError, ErrorKind, Result};
use crate::registry::{RequestIdentifiers, ResourceKey};

/// A successfully retrieved resource key. `data` is `None` when the API had
/// nothing for it (404).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceResult {
    pub resource_key: String,
    pub data: Option<Value>,
    pub needs_ai_summary: bool,
    pub label: String,
}

impl ResourceResult {
    pub fn key(&self) -> Option<ResourceKey> {
        self.resource_key.parse().ok()
    }
}

/// A resource key that could not be retrieved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceFailure {
    pub resource_key: String,
    pub error: String,
    pub kind: ErrorKind,
}

/// Outcome of a fan-out: successes keyed by resource key, failures in request
/// order. Every requested key lands in exactly one of the two.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub results: HashMap<String, ResourceResult>,
    pub errors: Vec<ResourceFailure>,
}

impl FetchOutcome {
    pub fn requested(&self) -> usize {
        self.results.len() + self.errors.len()
    }

    pub fn retrieved(&self) -> usize {
        self.results.len()
    }

    /// Results whose payload should go through the summarization pipeline.
    pub fn ai_flagged(&self) -> impl Iterator<Item = &ResourceResult> {
        self.results.values().filter(|r| r.needs_ai_summary)
    }
}

pub struct ResourceOrchestrator {
    api: Arc<dyn FhirApi>,
}

impl ResourceOrchestrator {
    pub fn new(api: Arc<dyn FhirApi>) -> Self {
        Self { api }
    }

    /// Retrieve one key. Single-item operation: errors are returned, not
    /// collected.
    pub async fn fetch_key(
        &self,
        key: ResourceKey,
        ids: &RequestIdentifiers,
    ) -> Result<ResourceResult> {
        self.fetch_key_on(key, ids, Utc::now().date_naive()).await
    }

    async fn fetch_key_on(
        &self,
        key: ResourceKey,
        ids: &RequestIdentifiers,
        today: NaiveDate,
    ) -> Result<ResourceResult> {
        let query = key.query(ids, today)?;
        let data = self.api.get(&query.path(), query.params()).await?;

        Ok(ResourceResult {
            resource_key: key.as_str().to_string(),
            data,
            needs_ai_summary: key.needs_ai_summary(),
            label: key.label().to_string(),
        })
    }

    /// Fetch every requested key concurrently and wait for all of them.
    ///
    /// Per-key failures (unknown key, missing identifier, remote errors,
    /// timeouts) are reported in `errors` and never affect sibling keys. The
    /// call itself only fails when no keys were requested, or when every
    /// dispatched request failed because the API could not be reached at all.
    pub async fn fetch_selected<S: AsRef<str>>(
        &self,
        patient_id: Option<&str>,
        worker_id: Option<&str>,
        resource_keys: &[S],
    ) -> Result<FetchOutcome> {
        let keys = dedupe(resource_keys);
        if keys.is_empty() {
            return Err(EhrError::InvalidRequest(
                "at least one resource key is required".to_string(),
            ));
        }

        let ids = RequestIdentifiers::new(patient_id, worker_id);
        let today = Utc::now().date_naive();
        info!(
            requested = keys.len(),
            patient = ?ids.patient_id,
            worker = ?ids.worker_id,
            "Fetching selected resources"
        );

        let fetches = keys.iter().map(|raw| {
            let ids = &ids;
            async move {
                let outcome = match raw.parse::<ResourceKey>() {
                    Ok(key) => Dispatch::Sent(self.fetch_key_on(key, ids, today).await),
                    Err(err) => Dispatch::Rejected(err),
                };
                (raw.clone(), outcome)
            }
        });
        let settled = join_all(fetches).await;

        let dispatched: Vec<&Result<ResourceResult>> = settled
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                Dispatch::Sent(result) => Some(result),
                Dispatch::Rejected(_) => None,
            })
            .collect();
        let unreachable = !dispatched.is_empty()
            && dispatched
                .iter()
                .all(|result| matches!(result, Err(err) if err.is_connectivity()));

        if unreachable {
            warn!("EHR API unreachable for every requested resource");
            return Err(settled
                .into_iter()
                .find_map(|(_, outcome)| match outcome {
                    Dispatch::Sent(Err(err)) => Some(err),
                    _ => None,
                })
                .unwrap_or_else(|| EhrError::InvalidRequest("no request was dispatched".into())));
        }

        let mut outcome = FetchOutcome::default();
        for (raw, result) in settled {
            match result.into_result() {
                Ok(result) => {
                    outcome.results.insert(raw, result);
                }
                Err(err) => {
                    warn!(resource_key = %raw, error = %err, "Resource fetch failed");
                    outcome.errors.push(ResourceFailure {
                        resource_key: raw,
                        kind: err.kind(),
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            retrieved = outcome.retrieved(),
            failed = outcome.errors.len(),
            "Resource fan-out settled"
        );
        Ok(outcome)
    }
}

enum Dispatch {
    Sent(Result<ResourceResult>),
    Rejected(EhrError),
}

impl Dispatch {
    fn into_result(self) -> Result<ResourceResult> {
        match self {
            Dispatch::Sent(result) => result,
            Dispatch::Rejected(err) => Err(err),
        }
    }
}

/// Trim keys, drop blanks and repeated keys, keep first-seen order.
fn dedupe<S: AsRef<str>>(keys: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.iter()
        .map(|k| k.as_ref().trim())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.to_string()))
        .map(str::to_string)
        .collect()
}
