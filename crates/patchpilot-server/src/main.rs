mod cli;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use patchpilot_ai::OpenAIClient;
use patchpilot_core::config::LogFormat;
use patchpilot_core::daemon::http::{HttpConfig, HttpServer};
use patchpilot_core::{AgentService, ServiceConfig};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,patchpilot_core=debug,patchpilot_ai=debug".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    init_tracing(config.logging.format);

    tracing::info!("Starting PatchPilot server");

    let api_key = config.api_key().with_context(|| {
        format!(
            "No API key found; set the {} environment variable",
            config.llm.api_key_env
        )
    })?;
    let llm = OpenAIClient::new(api_key)
        .with_model(&config.llm.model)
        .with_base_url(&config.llm.base_url);
    tracing::info!(model = %config.llm.model, base_url = %config.llm.base_url, "LLM client configured");

    let http_config = HttpConfig::from(&config.server);
    let service = Arc::new(AgentService::new(config, Arc::new(llm)));
    service.start().await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let served = HttpServer::new(http_config, service.clone())
        .run(shutdown_rx)
        .await;

    if !service.shutdown(SHUTDOWN_GRACE).await {
        tracing::warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "Shutdown grace period elapsed with jobs still queued"
        );
    }
    served
}
