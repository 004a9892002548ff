use async_trait::async_trait;
use reqwest::{
    RequestBuilder, Response, StatusCode,
    header::{ACCEPT, CONTENT_TYPE},
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::TokenManager;
use crate::config::FhirApiConfig;
use crate::error::{EhrError, Result};

pub const FHIR_JSON: &str = "application/fhir+json";

/// Longest error body kept in a `RemoteRequestFailure`.
const MAX_ERROR_BODY: usize = 1000;

/// Authenticated access to the FHIR API.
#[async_trait]
pub trait FhirApi: Send + Sync {
    /// `GET <base>/<path>?<query>`. A 404 resolves to `Ok(None)`.
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Option<Value>>;

    async fn post(&self, path: &str, body: &Value) -> Result<Value>;
}

/// Send a request with the current token; on 401 drop that token, fetch a
/// fresh one and send exactly once more. A second 401 is terminal.
pub(crate) async fn send_with_reauth<F>(tokens: &TokenManager, build: F) -> Result<Response>
where
    F: Fn(&str) -> RequestBuilder + Send + Sync,
{
    let token = tokens.get_token().await?;
    let response = build(&token).send().await?;
    if response.status() != StatusCode::UNAUTHORIZED {
        return Ok(response);
    }

    warn!("Request rejected with 401, refreshing token and retrying once");
    tokens.invalidate_if_current(&token).await;
    let token = tokens.get_token().await?;
    let response = build(&token).send().await?;

    if response.status() == StatusCode::UNAUTHORIZED {
        let body = error_body(response).await;
        return Err(EhrError::AuthenticationFailure(format!(
            "request rejected after token refresh: {}",
            body
        )));
    }
    Ok(response)
}

/// Read an error response body, truncated to a loggable size.
pub(crate) async fn error_body(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    if body.chars().count() > MAX_ERROR_BODY {
        let truncated: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{}...", truncated)
    } else {
        body
    }
}

pub struct ResourceClient {
    http_client: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager>,
}

impl ResourceClient {
    pub fn new(config: &FhirApiConfig, tokens: Arc<TokenManager>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EhrError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn parse_body(response: Response) -> Result<Value> {
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl FhirApi for ResourceClient {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Option<Value>> {
        let url = self.url(path);
        debug!(%url, params = query.len(), "GET");

        let response = send_with_reauth(&self.tokens, |token| {
            self.http_client
                .get(&url)
                .query(query)
                .bearer_auth(token)
                .header(ACCEPT, FHIR_JSON)
        })
        .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(%url, "Resource not found, treating as no data");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(EhrError::RemoteRequestFailure {
                status: status.as_u16(),
                body: error_body(response).await,
            });
        }

        Ok(Some(Self::parse_body(response).await?))
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        let payload = serde_json::to_vec(body)?;
        debug!(%url, bytes = payload.len(), "POST");

        let response = send_with_reauth(&self.tokens, |token| {
            self.http_client
                .post(&url)
                .bearer_auth(token)
                .header(ACCEPT, FHIR_JSON)
                .header(CONTENT_TYPE, FHIR_JSON)
                .body(payload.clone())
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EhrError::RemoteRequestFailure {
                status: status.as_u16(),
                body: error_body(response).await,
            });
        }

        Self::parse_body(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockTokenEndpoint, auth_config, spawn_server};
    use axum::{
        Json, Router,
        extract::{Query, State},
        http::{HeaderMap, StatusCode as AxumStatus},
        response::{IntoResponse, Response as AxumResponse},
        routing::get,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct ApiState {
        calls: Arc<AtomicUsize>,
        /// Tokens the API refuses with 401.
        rejected: Arc<Vec<String>>,
    }

    fn bearer(headers: &HeaderMap) -> String {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default()
            .to_string()
    }

    async fn conditions(
        State(state): State<ApiState>,
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> AxumResponse {
        state.calls.fetch_add(1, Ordering::SeqCst);
        if state.rejected.contains(&bearer(&headers)) {
            return AxumStatus::UNAUTHORIZED.into_response();
        }
        let accept = headers.get("accept").and_then(|v| v.to_str().ok());
        if accept != Some(FHIR_JSON) {
            return AxumStatus::NOT_ACCEPTABLE.into_response();
        }
        Json(json!({
            "resourceType": "Bundle",
            "subject": params.get("subject"),
            "entry": []
        }))
        .into_response()
    }

    async fn broken() -> AxumResponse {
        (AxumStatus::SERVICE_UNAVAILABLE, "maintenance window").into_response()
    }

    async fn missing() -> AxumResponse {
        AxumStatus::NOT_FOUND.into_response()
    }

    async fn echo(State(state): State<ApiState>, Json(body): Json<serde_json::Value>) -> AxumResponse {
        state.calls.fetch_add(1, Ordering::SeqCst);
        (AxumStatus::CREATED, Json(body)).into_response()
    }

    async fn setup(rejected: &[&str]) -> (ResourceClient, MockTokenEndpoint, Arc<AtomicUsize>) {
        let endpoint = MockTokenEndpoint::new(3600);
        let calls = Arc::new(AtomicUsize::new(0));
        let state = ApiState {
            calls: calls.clone(),
            rejected: Arc::new(rejected.iter().map(|s| s.to_string()).collect()),
        };
        let api = Router::new()
            .route("/fhir/Condition", get(conditions))
            .route("/fhir/Broken", get(broken))
            .route("/fhir/Patient/{id}", get(missing))
            .route("/fhir/Communication", axum::routing::post(echo))
            .with_state(state);
        let router = endpoint.router().merge(api);
        let base = spawn_server(router).await;

        let tokens = Arc::new(TokenManager::new(auth_config(&base)).unwrap());
        let client =
            ResourceClient::new(&FhirApiConfig::new(format!("{}/fhir/", base)), tokens).unwrap();
        (client, endpoint, calls)
    }

    #[tokio::test]
    async fn test_get_sends_bearer_and_query() {
        let (client, endpoint, calls) = setup(&[]).await;

        let query = vec![("subject".to_string(), "Patient/P001".to_string())];
        let bundle = client.get("Condition", &query).await.unwrap().unwrap();

        assert_eq!(bundle["subject"], "Patient/P001");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(endpoint.calls(), 1);
    }

    #[tokio::test]
    async fn test_single_401_retries_with_fresh_token() {
        let (client, endpoint, calls) = setup(&["token-1"]).await;

        let bundle = client.get("Condition", &[]).await.unwrap();

        assert!(bundle.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(endpoint.calls(), 2);
    }

    #[tokio::test]
    async fn test_second_401_is_terminal() {
        let (client, endpoint, calls) = setup(&["token-1", "token-2", "token-3"]).await;

        let err = client.get("Condition", &[]).await.unwrap_err();

        assert!(matches!(err, EhrError::AuthenticationFailure(_)));
        // No third attempt.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(endpoint.calls(), 2);
    }

    #[tokio::test]
    async fn test_404_on_get_is_no_data() {
        let (client, _, _) = setup(&[]).await;
        assert!(client.get("Patient/P404", &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_error_carries_status_and_body() {
        let (client, _, _) = setup(&[]).await;

        match client.get("Broken", &[]).await.unwrap_err() {
            EhrError::RemoteRequestFailure { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance window");
            }
            other => panic!("expected remote failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_post_round_trips_json_body() {
        let (client, _, calls) = setup(&[]).await;

        let body = json!({ "resourceType": "Communication", "status": "completed" });
        let created = client.post("Communication", &body).await.unwrap();

        assert_eq!(created, body);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_api_reports_connectivity() {
        let endpoint = MockTokenEndpoint::new(3600);
        let base = spawn_server(endpoint.router()).await;
        let tokens = Arc::new(TokenManager::new(auth_config(&base)).unwrap());
        // Port 9 on localhost is not served in the test environment.
        let client =
            ResourceClient::new(&FhirApiConfig::new("http://127.0.0.1:9/fhir"), tokens).unwrap();

        let err = client.get("Condition", &[]).await.unwrap_err();
        assert!(err.is_connectivity(), "unexpected error: {:?}", err);
    }
}
