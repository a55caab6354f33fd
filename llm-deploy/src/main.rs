use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use llm_deploy::config::{redact, DeployConfig};
use llm_deploy::pipeline::Deployer;

#[tokio::main]
async fn main() -> Result<()> {
    let config = DeployConfig::parse();

    // Use JSON logs in production (LOG_JSON=1), human-readable otherwise
    let filter = EnvFilter::from_default_env()
        .add_directive("llm_deploy=info".parse()?)
        .add_directive("tower_http=info".parse()?);
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    config.validate().context("invalid configuration")?;

    tracing::info!(
        github_user = %config.github_username,
        secret = %redact(&config.shared_secret),
        model = %config.llm_model,
        deadline_secs = config.job_deadline_secs,
        "Starting llm-deploy"
    );

    let deployer = Arc::new(Deployer::from_config(&config)?);
    let app = llm_deploy::web::router(deployer);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
    tracing::info!("shutting down");
}
