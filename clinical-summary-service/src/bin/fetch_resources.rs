use anyhow::{Result, anyhow};
use clinical_summary_service::EhrSettings;
use ehr_connect::{ResourceClient, ResourceOrchestrator, TokenManager, format_result};
use std::collections::HashSet;
use std::env;
use std::sync::Arc;

const USAGE: &str = "Usage: fetch_resources <patient_id|-> [--worker <worker_id>] <resource_key>...";

struct Args {
    patient_id: Option<String>,
    worker_id: Option<String>,
    keys: Vec<String>,
}

fn parse_args(raw: Vec<String>) -> Result<Args> {
    let mut raw = raw.into_iter();
    let patient_id = match raw.next() {
        Some(id) if id == "-" => None,
        Some(id) => Some(id),
        None => return Err(anyhow!(USAGE)),
    };

    let mut worker_id = None;
    let mut keys = Vec::new();
    while let Some(arg) = raw.next() {
        if arg == "--worker" {
            worker_id = Some(raw.next().ok_or_else(|| anyhow!("--worker needs a value"))?);
        } else {
            keys.push(arg);
        }
    }
    if keys.is_empty() {
        return Err(anyhow!(USAGE));
    }

    Ok(Args {
        patient_id,
        worker_id,
        keys,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter("warn").init();

    let args = match parse_args(env::args().skip(1).collect()) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Example: fetch_resources P001 Patient Condition VisitNotes");
            std::process::exit(1);
        }
    };

    let settings = EhrSettings::from_env()?;
    let tokens = Arc::new(TokenManager::new(settings.auth)?);
    let client = ResourceClient::new(&settings.fhir, tokens)?;
    let orchestrator = ResourceOrchestrator::new(Arc::new(client));

    println!("EHR Resource Fetch");
    println!("==================");
    println!("API: {}", settings.fhir.base_url);
    println!();

    let outcome = orchestrator
        .fetch_selected(
            args.patient_id.as_deref(),
            args.worker_id.as_deref(),
            &args.keys,
        )
        .await?;

    println!(
        "Retrieved {} of {} requested resources",
        outcome.retrieved(),
        outcome.requested()
    );
    println!();

    let mut printed = HashSet::new();
    for key in &args.keys {
        let Some(result) = outcome.results.get(key.trim()) else {
            continue;
        };
        if !printed.insert(key.trim()) {
            continue;
        }
        let flag = if result.needs_ai_summary { " [AI summary]" } else { "" };
        println!("{} ({}){}", result.label, result.resource_key, flag);
        println!("────────────────────────────────────");
        for line in format_result(result) {
            println!("  {}", line);
        }
        println!();
    }

    if !outcome.errors.is_empty() {
        println!("Failed:");
        for failure in &outcome.errors {
            println!("  {}: {}", failure.resource_key, failure.error);
        }
    }

    Ok(())
}
