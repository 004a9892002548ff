use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Initialize tracing. `LOG_FORMAT=pretty` for development, JSON otherwise.
pub fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "clinical_summary_service=info,ehr_connect=info,tower_http=info".into()
    });

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

/// Tag every request with a correlation id, reusing the caller's if one was
/// sent, and run the handler inside an `http_request` span carrying it.
pub async fn correlation_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let header = HeaderValue::from_str(&correlation_id)
        .unwrap_or_else(|_| HeaderValue::from_static("invalid"));
    request
        .headers_mut()
        .insert(CORRELATION_HEADER, header.clone());

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    let mut response = next.run(request).instrument(span).await;
    response.headers_mut().insert(CORRELATION_HEADER, header);
    response
}
