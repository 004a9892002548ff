//! Local HTTP stand-ins shared by the module tests.

use axum::{
    Form, Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::AuthConfig;

pub(crate) const TEST_SECRET: &str = "secret";

/// Serve `router` on an ephemeral local port and return its base URL.
pub(crate) async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub(crate) fn auth_config(base_url: &str) -> AuthConfig {
    AuthConfig::new(
        format!("{}/token", base_url),
        "test-client",
        "rsid-1",
        TEST_SECRET,
    )
}

/// Token endpoint issuing `token-1`, `token-2`, ... on successive calls.
#[derive(Clone)]
pub(crate) struct MockTokenEndpoint {
    calls: Arc<AtomicUsize>,
    expires_in: i64,
    delay: Duration,
    failing: bool,
}

impl MockTokenEndpoint {
    pub(crate) fn new(expires_in: i64) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            expires_in,
            delay: Duration::ZERO,
            failing: false,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new(3600)
        }
    }

    pub(crate) fn with_delay_ms(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn router(&self) -> Router {
        Router::new()
            .route("/token", post(issue_token))
            .with_state(self.clone())
    }
}

async fn issue_token(
    State(endpoint): State<MockTokenEndpoint>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let n = endpoint.calls.fetch_add(1, Ordering::SeqCst) + 1;
    if !endpoint.delay.is_zero() {
        tokio::time::sleep(endpoint.delay).await;
    }

    let valid = form.get("grant_type").map(String::as_str) == Some("agency_auth")
        && form.get("agency_secret").map(String::as_str) == Some(TEST_SECRET)
        && form.contains_key("client_id")
        && form.contains_key("scope")
        && form.contains_key("resource_security_id");

    if endpoint.failing || !valid {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_client" })),
        )
            .into_response();
    }

    Json(json!({
        "access_token": format!("token-{}", n),
        "expires_in": endpoint.expires_in,
        "token_type": "Bearer"
    }))
    .into_response()
}
