pub mod api;
pub mod config;
pub mod generation;
pub mod orchestrator;

use config::{ConfigError, ServiceConfig};
use orchestrator::FallbackOrchestrator;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub async fn run() -> Result<(), ServerError> {
    // RUST_LOG may come from .env
    let _ = dotenvy::dotenv();
    init_tracing();
    let config = ServiceConfig::load()?;

    let addr = config.socket_addr()?;
    let orchestrator = Arc::new(FallbackOrchestrator::from_config(&config));

    if orchestrator.provider_ids().is_empty() {
        tracing::warn!("No image providers configured; every generation will fail");
    } else {
        tracing::info!(
            "Orchestrator ready: providers={:?}, failure_threshold={}",
            orchestrator.provider_ids(),
            config.failure_threshold
        );
    }

    let app = api::router(orchestrator);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
