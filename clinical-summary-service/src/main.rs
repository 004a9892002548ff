use clinical_summary_service::{ServiceConfig, create_app, telemetry::init_tracing};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; real deployments set the environment directly.
    dotenvy::dotenv().ok();
    init_tracing();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        fhir = %config.ehr.fhir.base_url,
        extraction = %config.extraction.base_url,
        model = %config.completion.model,
        "Configuration loaded"
    );

    let app = create_app(&config)?;
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let addr = listener.local_addr()?;

    info!("Clinical Summary Service starting on {}", addr);
    info!("API Documentation available at http://{}/", addr);
    info!("Health check endpoint: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
