//! Destinations for published events.

pub mod console;
pub mod file;

pub use crate::config::PublishMode;
pub use console::ConsoleSink;
pub use file::FileSink;

use crate::config::{OutputConfig, OutputKind};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("output is closed")]
    Closed,
}

/// Receives batches of JSON documents.
///
/// With [`PublishMode::Sync`] a successful return means the documents have
/// been handed off durably; with [`PublishMode::FireAndForget`] the sink may
/// still be buffering them.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn publish(&self, events: &[Value], mode: PublishMode) -> Result<(), OutputError>;
}

/// Build the sink described by the `output` section.
pub fn build_sink(config: &OutputConfig) -> Result<Arc<dyn Sink>, OutputError> {
    Ok(match &config.kind {
        OutputKind::Console => Arc::new(ConsoleSink::new()),
        OutputKind::File { path } => Arc::new(FileSink::open(path)?),
    })
}
