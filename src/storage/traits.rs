use crate::input::FileState;
use async_trait::async_trait;
use std::path::PathBuf;

/// Where the registrar keeps file states between runs.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Make sure the store can be written to, e.g. by creating directories.
    async fn init(&self) -> Result<(), RegistryError>;

    /// Every persisted state. An empty store yields an empty list.
    async fn load(&self) -> Result<Vec<FileState>, RegistryError>;

    /// Replace the stored table. When two states share a source path the
    /// later one in `states` wins.
    async fn save(&self, states: &[FileState]) -> Result<(), RegistryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid registry file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
