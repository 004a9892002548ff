use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    middleware::from_fn,
    response::Json,
    routing::{get, post},
};
use ehr_connect::{
    ChatCompletionClient, DocumentPipeline, EhrError, HttpTextExtractor, PatientDocuments,
    ResourceClient, ResourceKey, ResourceOrchestrator, TokenManager,
    documents::{documents_from_bundle, most_recent},
    format_result,
};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    config::ServiceConfig,
    models::{
        BatchTotals, FetchResourcesRequest, FetchResourcesResponse, PatientSummaryRequest,
        PatientSummaryResponse, ResourceDescription, SummarizeDocumentsRequest,
        SummarizeDocumentsResponse,
    },
    telemetry::correlation_id_middleware,
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn bad_gateway_error(message: &str, err: &EhrError) -> ApiError {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({
            "error": message,
            "kind": err.kind(),
            "details": err.to_string()
        })),
    )
}

/// Map a wholesale orchestrator failure onto a response.
fn fetch_error(err: EhrError) -> ApiError {
    match err {
        EhrError::InvalidRequest(message) => bad_request_error(&message),
        EhrError::Config(details) => internal_error("Service misconfigured", &details),
        other => {
            error!("Resource fetch failed: {}", other);
            bad_gateway_error("EHR API unavailable", &other)
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ResourceOrchestrator>,
    pub pipeline: Arc<DocumentPipeline>,
    /// Relative attachment URLs are resolved against this.
    pub fhir_base_url: String,
}

pub fn create_app(config: &ServiceConfig) -> ehr_connect::Result<Router> {
    let app_state = create_app_state(config)?;
    Ok(build_router(app_state))
}

fn create_app_state(config: &ServiceConfig) -> ehr_connect::Result<AppState> {
    let tokens = Arc::new(TokenManager::new(config.ehr.auth.clone())?);
    let client = ResourceClient::new(&config.ehr.fhir, tokens.clone())?;
    let fhir_base_url = client.base_url().to_string();

    let extractor = HttpTextExtractor::new(&config.extraction, tokens)?;
    let completions = ChatCompletionClient::new(config.completion.clone())?;
    info!(model = completions.model(), "Completion client ready");

    Ok(AppState {
        orchestrator: Arc::new(ResourceOrchestrator::new(Arc::new(client))),
        pipeline: Arc::new(DocumentPipeline::new(
            Arc::new(extractor),
            Arc::new(completions),
            config.pipeline.clone(),
        )),
        fhir_base_url,
    })
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/v1/resources", get(list_resources))
        .route("/api/v1/resources/fetch", post(fetch_resources))
        .route("/api/v1/documents/summarize", post(summarize_documents))
        .route(
            "/api/v1/patients/{patient_id}/summary",
            post(patient_summary),
        )
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Clinical Summary Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "EHR resource retrieval and AI document summaries for home health visits",
        "endpoints": {
            "GET /api/v1/resources": "List supported resource keys",
            "POST /api/v1/resources/fetch": "Fetch selected resources for a patient or worker",
            "POST /api/v1/documents/summarize": "Summarize documents for a batch of patients",
            "POST /api/v1/patients/{patient_id}/summary": "Fetch and summarize a patient's documents",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn list_resources() -> Json<Vec<ResourceDescription>> {
    Json(ResourceKey::ALL.into_iter().map(Into::into).collect())
}

async fn fetch_resources(
    State(state): State<AppState>,
    Json(request): Json<FetchResourcesRequest>,
) -> ApiResult<FetchResourcesResponse> {
    info!(
        keys = request.resource_keys.len(),
        patient_id = ?request.patient_id,
        worker_id = ?request.worker_id,
        "Fetching resources"
    );

    if request.resource_keys.iter().all(|k| k.trim().is_empty()) {
        return Err(bad_request_error("resource_keys must not be empty"));
    }

    let outcome = state
        .orchestrator
        .fetch_selected(
            request.patient_id.as_deref(),
            request.worker_id.as_deref(),
            &request.resource_keys,
        )
        .await
        .map_err(fetch_error)?;

    let rendered = outcome
        .results
        .iter()
        .map(|(key, result)| (key.clone(), format_result(result)))
        .collect();

    Ok(Json(FetchResourcesResponse {
        requested: outcome.requested(),
        retrieved: outcome.retrieved(),
        results: outcome.results,
        errors: outcome.errors,
        rendered,
    }))
}

fn validate_max_docs(max_docs: usize) -> Result<usize, ApiError> {
    if max_docs == 0 {
        return Err(bad_request_error("max_docs must be at least 1"));
    }
    Ok(max_docs)
}

async fn summarize_documents(
    State(state): State<AppState>,
    Json(request): Json<SummarizeDocumentsRequest>,
) -> ApiResult<SummarizeDocumentsResponse> {
    if request.patients.is_empty() {
        return Err(bad_request_error("patients must not be empty"));
    }
    if request.patients.iter().any(|p| p.id.trim().is_empty()) {
        return Err(bad_request_error("every patient needs an id"));
    }

    let options = state.pipeline.options();
    let max_docs =
        validate_max_docs(request.max_docs_per_patient.unwrap_or(options.max_docs_per_patient))?;
    let concurrency = request.concurrency.unwrap_or(options.concurrency);

    let patients = state
        .pipeline
        .batch_summarize(request.patients, max_docs, concurrency)
        .await;
    let totals = BatchTotals::from_results(patients.values());
    info!(
        patients = totals.patients,
        succeeded = totals.succeeded,
        failed = totals.failed,
        "Batch summarization finished"
    );

    Ok(Json(SummarizeDocumentsResponse { patients, totals }))
}

async fn patient_summary(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
    Json(request): Json<PatientSummaryRequest>,
) -> ApiResult<PatientSummaryResponse> {
    let keys = match request.document_keys {
        Some(keys) => document_keys(&keys)?,
        None => ResourceKey::DOCUMENT_KEYS.to_vec(),
    };
    let max_docs =
        validate_max_docs(request.max_docs.unwrap_or(state.pipeline.options().max_docs_per_patient))?;
    info!(%patient_id, keys = keys.len(), "Building patient document summary");

    let key_names: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
    let outcome = state
        .orchestrator
        .fetch_selected(Some(patient_id.as_str()), None, &key_names)
        .await
        .map_err(fetch_error)?;

    let mut documents = Vec::new();
    for key in &keys {
        if let Some(bundle) = outcome.results.get(key.as_str()).and_then(|r| r.data.as_ref()) {
            documents.extend(
                documents_from_bundle(bundle)
                    .into_iter()
                    .map(|d| d.with_base_url(&state.fhir_base_url)),
            );
        }
    }
    // The same DocumentReference can match more than one type filter.
    let mut seen = HashSet::new();
    documents.retain(|d| seen.insert(d.id.clone()));
    let documents_found = documents.len();

    if !outcome.errors.is_empty() {
        warn!(
            %patient_id,
            failed = outcome.errors.len(),
            "Some document lists could not be fetched"
        );
    }

    let patient = PatientDocuments {
        id: patient_id.clone(),
        context: request.context,
        documents: most_recent(documents, max_docs),
    };
    let result = state.pipeline.summarize_patient(&patient, max_docs).await;

    Ok(Json(PatientSummaryResponse {
        patient_id,
        documents_found,
        fetch_errors: outcome.errors,
        result,
    }))
}

/// Parse requested document keys, rejecting anything that is not a document
/// list.
fn document_keys(raw: &[String]) -> Result<Vec<ResourceKey>, ApiError> {
    if raw.is_empty() {
        return Err(bad_request_error("document_keys must not be empty"));
    }
    let mut keys: Vec<ResourceKey> = Vec::new();
    for name in raw {
        let key: ResourceKey = name
            .trim()
            .parse()
            .map_err(|e: EhrError| bad_request_error(&e.to_string()))?;
        if !key.is_document() {
            return Err(bad_request_error(&format!(
                "{} is not a document resource key",
                key
            )));
        }
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    Ok(keys)
}
