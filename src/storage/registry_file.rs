//! JSON registry file.
//!
//! The file holds one object keyed by source path. Writes go to a temporary
//! file next to the registry which is then renamed over it, so a crash never
//! leaves a half-written registry behind.

use super::traits::{RegistryError, StateStore};
use crate::input::FileState;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub struct RegistryFile {
    path: PathBuf,
}

impl RegistryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> RegistryError {
        RegistryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl StateStore for RegistryFile {
    async fn init(&self) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }
        Ok(())
    }

    async fn load(&self) -> Result<Vec<FileState>, RegistryError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let table: BTreeMap<String, FileState> =
            serde_json::from_str(&content).map_err(|source| RegistryError::Json {
                path: self.path.clone(),
                source,
            })?;

        Ok(table.into_values().collect())
    }

    async fn save(&self, states: &[FileState]) -> Result<(), RegistryError> {
        let table: BTreeMap<String, &FileState> = states
            .iter()
            .map(|state| (state.source.to_string_lossy().into_owned(), state))
            .collect();

        atomic_write(&self.path, &table)
    }
}

fn atomic_write(path: &Path, table: &BTreeMap<String, &FileState>) -> Result<(), RegistryError> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let io_error = |source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    };

    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(format!(".tmp.{}.{}", std::process::id(), unique_id));
    let temp_path = PathBuf::from(temp_name);

    let file = File::create(&temp_path).map_err(io_error)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, table).map_err(|source| RegistryError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_error)?;
    drop(writer);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(io_error(e));
    }

    Ok(())
}
