use crate::config::{load_config, ConfigError};
use crate::output::{build_sink, OutputError};
use crate::pipeline::{Pipeline, PipelineError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::signal;
use tracing::info;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(
        "config not found (searched ~/.config/tailbeat/config.yml and /etc/tailbeat/config.yml); \
         use --config <path> or run 'tailbeat config init'"
    )]
    ConfigNotFound,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("output error: {0}")]
    Output(#[from] OutputError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("signal handler error: {0}")]
    Signal(#[from] std::io::Error),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), RunError> {
    let config_path = config_path.ok_or(RunError::ConfigNotFound)?;
    run_pipeline(&config_path).await
}

async fn run_pipeline(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let sink = build_sink(&config.output)?;
    let pipeline = Pipeline::start(&config, sink).await?;
    info!(
        prospectors = config.tailbeat.prospectors.len(),
        "Pipeline started, press Ctrl+C to shutdown"
    );

    wait_for_shutdown().await?;
    info!("Shutdown signal received");

    pipeline.shutdown().await?;
    info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    let mut terminate = unix_signal(SignalKind::terminate())?;
    tokio::select! {
        res = signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> std::io::Result<()> {
    signal::ctrl_c().await
}
