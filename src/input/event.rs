use super::file_id::FileId;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

/// Snapshot of a file's stat data taken when its harvester opened it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub file_id: FileId,
    pub size: u64,
    pub modified: SystemTime,
}

impl FileInfo {
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            file_id: FileId::from_metadata(metadata),
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }
}

/// One line read from a file.
#[derive(Debug, Clone)]
pub struct FileEvent {
    pub read_time: DateTime<Utc>,
    pub source: Arc<PathBuf>,
    pub input_type: Arc<str>,
    pub document_type: Arc<str>,
    /// Byte position at which this line starts
    pub offset: u64,
    /// Raw bytes the line occupies in the file, terminator included
    pub bytes: usize,
    pub text: String,
    pub fields: Arc<HashMap<String, String>>,
    pub fields_under_root: bool,
    pub file_info: FileInfo,
    /// Set when the line had no terminator yet; such events never move the
    /// committed offset.
    pub is_partial: bool,
}

impl FileEvent {
    /// Offset right after this event, as committed once it is acknowledged.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.bytes as u64
    }

    /// Document handed to the output.
    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();
        doc.insert(
            "@timestamp".to_string(),
            json!(self.read_time.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        doc.insert(
            "source".to_string(),
            json!(self.source.to_string_lossy()),
        );
        doc.insert("offset".to_string(), json!(self.offset));
        doc.insert("message".to_string(), json!(self.text));
        doc.insert("type".to_string(), json!(&*self.document_type));
        doc.insert("input_type".to_string(), json!(&*self.input_type));
        doc.insert("count".to_string(), json!(1));

        if self.is_partial {
            doc.insert("partial".to_string(), json!(true));
        }

        if !self.fields.is_empty() {
            if self.fields_under_root {
                for (key, value) in self.fields.iter() {
                    doc.insert(key.clone(), json!(value));
                }
            } else {
                doc.insert("fields".to_string(), json!(&*self.fields));
            }
        }

        Value::Object(doc)
    }
}

/// Persisted read position of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub source: PathBuf,
    pub offset: u64,
    #[serde(rename = "file_state_os")]
    pub file_id: FileId,
}

impl FileState {
    pub fn new(source: impl Into<PathBuf>, offset: u64, file_id: FileId) -> Self {
        Self {
            source: source.into(),
            offset,
            file_id,
        }
    }
}
