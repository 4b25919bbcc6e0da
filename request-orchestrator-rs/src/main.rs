// request-orchestrator-rs/src/main.rs
// Sends one request through the orchestrator against a dry-run document

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::Context;
use error_recovery_rs::init_logging;
use request_orchestrator_rs::{load_config, DryRunDocument, Request, RequestOrchestrator};
use tracing::info;

const DEFAULT_REQUEST: &str = "insert a 3x4 table";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Usage: request-orchestrator [--config <file>] [request text...]
    let mut config_path: Option<PathBuf> = None;
    let mut words = Vec::new();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            let path = args.next().context("--config requires a file path")?;
            config_path = Some(PathBuf::from(path));
        } else {
            words.push(arg);
        }
    }

    let config = load_config(config_path.as_deref()).context("failed to load configuration")?;
    init_logging(Some(config.logging.clone())).context("failed to initialize logging")?;

    info!(backend_url = %config.backend_url, offline_mode = config.enable_offline_mode, "Request orchestrator starting");

    let orchestrator = RequestOrchestrator::builder()
        .config(config)
        .document(Arc::new(DryRunDocument::new()))
        .build()
        .context("failed to build orchestrator")?;

    let text = if words.is_empty() {
        DEFAULT_REQUEST.to_string()
    } else {
        words.join(" ")
    };

    let outcome = orchestrator.process(Request::new(text)).await;
    println!("{}", outcome.display_text);

    // Queued requests get delivered once the backend recovers, or dropped on exit
    if let Some(message_id) = &outcome.queued_message_id {
        info!(message_id = %message_id, "Request left in the offline queue");
    }

    let stats = orchestrator.stats();
    info!(
        requests = stats.requests,
        succeeded = stats.succeeded,
        failed = stats.failed,
        retries = stats.retries,
        "Request orchestrator finished"
    );

    if outcome.is_success() {
        Ok(())
    } else {
        std::process::exit(1)
    }
}
