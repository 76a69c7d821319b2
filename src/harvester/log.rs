use super::encoding::find_encoding;
use super::line_reader::LineReader;
use crate::config::HarvesterConfig;
use crate::input::{self, FileEvent, FileId, FileInfo};
use chrono::Utc;
use encoding_rs::Encoding;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum HarvesterError {
    #[error("unknown encoding '{0}'")]
    UnknownEncoding(String),

    #[error("not a regular file: {0}")]
    NotRegularFile(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reported once a harvester has stopped and closed its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvesterExit {
    /// Offset right after the last complete line that was handed on
    pub offset: u64,
    /// Identity of the file that was read, if it was ever opened
    pub file_id: Option<FileId>,
}

enum EofAction {
    Wait,
    Rewound,
    Close(&'static str),
}

/// Tails a single file, turning each line into a [`FileEvent`].
pub struct Harvester {
    path: PathBuf,
    source: Arc<PathBuf>,
    config: HarvesterConfig,
    encoding: &'static Encoding,
    ignore_older: Duration,
    input_type: Arc<str>,
    document_type: Arc<str>,
    fields: Arc<HashMap<String, String>>,
    events: mpsc::Sender<FileEvent>,
    stop: CancellationToken,

    offset: u64,
    file_id: Option<FileId>,
}

impl Harvester {
    /// `offset` is the resume position; 0 means no stored state.
    pub fn new(
        path: impl Into<PathBuf>,
        config: &HarvesterConfig,
        ignore_older: Duration,
        offset: u64,
        events: mpsc::Sender<FileEvent>,
        stop: CancellationToken,
    ) -> Result<Self, HarvesterError> {
        let encoding = find_encoding(&config.encoding)
            .ok_or_else(|| HarvesterError::UnknownEncoding(config.encoding.clone()))?;
        let path = path.into();

        Ok(Self {
            source: Arc::new(path.clone()),
            path,
            config: config.clone(),
            encoding,
            ignore_older,
            input_type: Arc::from(config.input_type.as_str()),
            document_type: Arc::from(config.document_type.as_str()),
            fields: Arc::new(config.fields.clone()),
            events,
            stop,
            offset,
            file_id: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run on a new task. The receiver resolves with the final offset once
    /// the file handle has been closed.
    pub fn spawn(self) -> oneshot::Receiver<HarvesterExit> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let exit = self.run().await;
            let _ = tx.send(exit);
        });
        rx
    }

    pub async fn run(mut self) -> HarvesterExit {
        if let Err(e) = self.harvest().await {
            error!(path = %self.path.display(), error = %e, "Stopping harvester");
        }

        debug!(
            path = %self.path.display(),
            offset = self.offset,
            "Harvester finished"
        );

        HarvesterExit {
            offset: self.offset,
            file_id: self.file_id,
        }
    }

    async fn harvest(&mut self) -> Result<(), HarvesterError> {
        let Some(mut file) = self.open().await? else {
            return Ok(());
        };

        let info = FileInfo::from_metadata(&file.metadata()?);
        self.file_id = Some(info.file_id);
        self.offset = self.initial_offset(&mut file, &info)?;

        info!(
            path = %self.path.display(),
            offset = self.offset,
            file_id = %info.file_id,
            "Harvester started"
        );

        let floor = self.config.backoff;
        let mut reader = LineReader::new(file, self.encoding, self.config.buffer_size);
        let mut backoff = floor;
        let mut last_partial_len = 0;
        let mut last_line = Instant::now();
        let mut last_activity = reader.last_read();

        while !self.stop.is_cancelled() {
            if let Some((text, bytes)) = reader.next()? {
                backoff = floor;
                last_partial_len = 0;
                last_line = Instant::now();

                let event = self.event(text, bytes, &info, false);
                if !self.send(event).await {
                    break;
                }
                self.offset += bytes as u64;
                continue;
            }

            if reader.pending() > 0
                && reader.last_read().elapsed() >= self.config.partial_line_waiting
            {
                let (text, bytes) = reader.partial();
                // Nothing new since the last partial event
                if bytes > last_partial_len {
                    backoff = floor;
                    last_partial_len = bytes;
                    last_line = Instant::now();

                    let event = self.event(text, bytes, &info, true);
                    if !self.send(event).await {
                        break;
                    }
                    continue;
                }
            }

            let pending = reader.pending() as u64;
            match self.check_eof(reader.get_mut(), pending, last_line)? {
                EofAction::Rewound => {
                    reader.reset();
                    self.offset = 0;
                    last_partial_len = 0;
                    continue;
                }
                EofAction::Close(reason) => {
                    info!(path = %self.path.display(), reason, "Closing file");
                    break;
                }
                EofAction::Wait => {}
            }

            if reader.last_read() != last_activity {
                last_activity = reader.last_read();
                backoff = floor;
            }

            tokio::select! {
                _ = sleep(backoff) => {}
                _ = self.stop.cancelled() => break,
            }

            backoff = backoff
                .saturating_mul(self.config.backoff_factor)
                .min(self.config.max_backoff);
        }

        Ok(())
    }

    /// Open the file, retrying until it can be opened or we are stopped.
    async fn open(&self) -> Result<Option<File>, HarvesterError> {
        loop {
            // Checked before opening since open(2) on a FIFO blocks until a
            // writer shows up
            match std::fs::metadata(&self.path) {
                Ok(metadata) if !metadata.is_file() => {
                    return Err(HarvesterError::NotRegularFile(self.path.clone()));
                }
                _ => {}
            }

            match input::read_open(&self.path) {
                Ok(file) => {
                    if !input::is_regular_file(&file)? {
                        return Err(HarvesterError::NotRegularFile(self.path.clone()));
                    }
                    return Ok(Some(file));
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        retry_in = ?self.config.open_retry,
                        "Failed to open file"
                    );
                }
            }

            tokio::select! {
                _ = sleep(self.config.open_retry) => {}
                _ = self.stop.cancelled() => return Ok(None),
            }
        }
    }

    fn initial_offset(&self, file: &mut File, info: &FileInfo) -> Result<u64, HarvesterError> {
        let position = if self.offset > 0 {
            if self.offset > info.size {
                warn!(
                    path = %self.path.display(),
                    offset = self.offset,
                    size = info.size,
                    "Stored offset is past the end of the file, reading from the start"
                );
                file.seek(SeekFrom::Start(0))?
            } else {
                file.seek(SeekFrom::Start(self.offset))?
            }
        } else if self.config.tail_files {
            file.seek(SeekFrom::End(0))?
        } else {
            file.seek(SeekFrom::Start(0))?
        };
        Ok(position)
    }

    /// Decide what to do once the file has no more bytes. `pending` is what
    /// has been read past the committed offset.
    fn check_eof(
        &self,
        file: &mut File,
        pending: u64,
        last_line: Instant,
    ) -> Result<EofAction, HarvesterError> {
        let size = file.metadata()?.len();
        if size < self.offset + pending {
            warn!(
                path = %self.path.display(),
                offset = self.offset,
                size,
                "File was truncated, reading from the start"
            );
            file.seek(SeekFrom::Start(0))?;
            return Ok(EofAction::Rewound);
        }

        if last_line.elapsed() > self.ignore_older {
            return Ok(EofAction::Close("inactive for longer than ignore_older"));
        }

        if self.config.force_close_files {
            match FileId::from_path(&self.path) {
                Ok(id) if Some(id) == self.file_id => {}
                Ok(_) => return Ok(EofAction::Close("file was rotated")),
                Err(_) => return Ok(EofAction::Close("file was removed")),
            }
        }

        Ok(EofAction::Wait)
    }

    fn event(&self, text: String, bytes: usize, info: &FileInfo, is_partial: bool) -> FileEvent {
        FileEvent {
            read_time: Utc::now(),
            source: self.source.clone(),
            input_type: self.input_type.clone(),
            document_type: self.document_type.clone(),
            offset: self.offset,
            bytes,
            text,
            fields: self.fields.clone(),
            fields_under_root: self.config.fields_under_root,
            file_info: *info,
            is_partial,
        }
    }

    /// Hand an event on. A line already read goes out whenever the queue has
    /// room; only waiting for room is cut short by stop. Returns false if the
    /// event was not delivered.
    async fn send(&self, event: FileEvent) -> bool {
        let event = match self.events.try_send(event) {
            Ok(()) => return true,
            Err(TrySendError::Closed(_)) => return false,
            Err(TrySendError::Full(event)) => event,
        };

        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            res = self.events.send(event) => res.is_ok(),
        }
    }
}
