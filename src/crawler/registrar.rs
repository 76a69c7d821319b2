use crate::input::{FileEvent, FileId, FileState};
use crate::storage::{RegistryError, StateStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

const QUEUE_SIZE: usize = 16;

#[derive(Debug, Error)]
#[error("registrar has stopped")]
pub struct RegistrarClosed;

pub enum RegistrarMessage {
    /// Look up the stored offset for a file about to be harvested
    Fetch {
        path: PathBuf,
        file_id: FileId,
        reply: oneshot::Sender<(u64, bool)>,
    },
    /// Record a state directly, e.g. for a file that is being ignored
    Persist(FileState),
    /// Events whose batch was acknowledged by the output
    Batch(Vec<FileEvent>),
    Snapshot {
        reply: oneshot::Sender<Vec<FileState>>,
    },
}

/// Cloneable access to the registrar task. The registrar stops, writing the
/// registry one last time, once every handle has been dropped.
#[derive(Clone)]
pub struct RegistrarHandle {
    tx: mpsc::Sender<RegistrarMessage>,
}

impl RegistrarHandle {
    /// Stored offset for `file_id`, and whether there was one. A state stored
    /// under another path is treated as a rename and moved to `path`.
    pub async fn fetch_state(
        &self,
        path: &Path,
        file_id: FileId,
    ) -> Result<(u64, bool), RegistrarClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistrarMessage::Fetch {
            path: path.to_path_buf(),
            file_id,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RegistrarClosed)
    }

    pub async fn persist(&self, state: FileState) -> Result<(), RegistrarClosed> {
        self.send(RegistrarMessage::Persist(state)).await
    }

    /// Advance offsets past every complete line in an acknowledged batch.
    pub async fn commit(&self, events: Vec<FileEvent>) -> Result<(), RegistrarClosed> {
        self.send(RegistrarMessage::Batch(events)).await
    }

    /// Current table, ordered by source path.
    pub async fn snapshot(&self) -> Result<Vec<FileState>, RegistrarClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistrarMessage::Snapshot { reply }).await?;
        rx.await.map_err(|_| RegistrarClosed)
    }

    async fn send(&self, msg: RegistrarMessage) -> Result<(), RegistrarClosed> {
        self.tx.send(msg).await.map_err(|_| RegistrarClosed)
    }
}

struct Entry {
    state: FileState,
    /// Write order, so the newest state wins when two share a path on disk
    touched: u64,
}

/// Owns the table of file states and is its only writer.
pub struct Registrar {
    store: Box<dyn StateStore>,
    states: HashMap<FileId, Entry>,
    counter: u64,
    rx: mpsc::Receiver<RegistrarMessage>,
}

impl Registrar {
    /// Prepare the store and load every persisted state.
    pub async fn new(
        store: Box<dyn StateStore>,
    ) -> Result<(Self, RegistrarHandle), RegistryError> {
        store.init().await?;
        let loaded = store.load().await?;
        info!(files = loaded.len(), "Loaded registry");

        let (tx, rx) = mpsc::channel(QUEUE_SIZE);
        let mut registrar = Self {
            store,
            states: HashMap::new(),
            counter: 0,
            rx,
        };
        for state in loaded {
            registrar.put(state);
        }

        Ok((registrar, RegistrarHandle { tx }))
    }

    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                RegistrarMessage::Fetch {
                    path,
                    file_id,
                    reply,
                } => {
                    let found = self.fetch(path, file_id);
                    if found.1 {
                        self.write().await;
                    }
                    let _ = reply.send(found);
                }
                RegistrarMessage::Persist(state) => {
                    self.put(state);
                    self.write().await;
                }
                RegistrarMessage::Batch(events) => {
                    let mut updated = 0;
                    for event in events.iter().filter(|e| !e.is_partial) {
                        self.put(FileState::new(
                            event.source.as_path(),
                            event.end_offset(),
                            event.file_info.file_id,
                        ));
                        updated += 1;
                    }
                    debug!(events = events.len(), updated, "Registrar processing batch");
                    self.write().await;
                }
                RegistrarMessage::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                }
            }
        }

        self.write().await;
        info!("Registrar stopped");
    }

    fn fetch(&mut self, path: PathBuf, file_id: FileId) -> (u64, bool) {
        let Some(entry) = self.states.get_mut(&file_id) else {
            return (0, false);
        };

        if entry.state.source != path {
            info!(
                from = %entry.state.source.display(),
                to = %path.display(),
                offset = entry.state.offset,
                "File was renamed, resuming under new path"
            );
            entry.state.source = path;
        }

        self.counter += 1;
        entry.touched = self.counter;
        (entry.state.offset, true)
    }

    fn put(&mut self, state: FileState) {
        self.counter += 1;
        self.states.insert(
            state.file_id,
            Entry {
                state,
                touched: self.counter,
            },
        );
    }

    fn snapshot(&self) -> Vec<FileState> {
        let mut states: Vec<FileState> = self.states.values().map(|e| e.state.clone()).collect();
        states.sort_by(|a, b| a.source.cmp(&b.source));
        states
    }

    async fn write(&self) {
        let mut entries: Vec<&Entry> = self.states.values().collect();
        entries.sort_by_key(|e| e.touched);
        let states: Vec<FileState> = entries.into_iter().map(|e| e.state.clone()).collect();

        if let Err(e) = self.store.save(&states).await {
            error!(error = %e, "Failed to write registry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::FileInfo;
    use crate::storage::RegistryFile;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::SystemTime;
    use tempfile::TempDir;
    use tokio::task::JoinHandle;

    fn event(path: &str, file_id: FileId, offset: u64, bytes: usize, is_partial: bool) -> FileEvent {
        FileEvent {
            read_time: Utc::now(),
            source: Arc::new(PathBuf::from(path)),
            input_type: Arc::from("log"),
            document_type: Arc::from("log"),
            offset,
            bytes,
            text: "x".to_string(),
            fields: Arc::new(HashMap::new()),
            fields_under_root: false,
            file_info: FileInfo {
                file_id,
                size: 0,
                modified: SystemTime::UNIX_EPOCH,
            },
            is_partial,
        }
    }

    async fn start(store: Box<dyn StateStore>) -> (RegistrarHandle, JoinHandle<()>) {
        let (registrar, handle) = Registrar::new(store).await.unwrap();
        (handle, tokio::spawn(registrar.run()))
    }

    async fn read_disk(path: &Path) -> Vec<FileState> {
        let mut states = RegistryFile::new(path).load().await.unwrap();
        states.sort_by(|a, b| a.source.cmp(&b.source));
        states
    }

    #[tokio::test]
    async fn test_unknown_file() {
        let dir = TempDir::new().unwrap();
        let (handle, _task) = start(Box::new(RegistryFile::new(dir.path().join("reg")))).await;

        let found = handle
            .fetch_state(Path::new("/var/log/a.log"), FileId::new(1, 1))
            .await
            .unwrap();
        assert_eq!(found, (0, false));
    }

    #[tokio::test]
    async fn test_commit_advances_offsets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reg");
        let (handle, _task) = start(Box::new(RegistryFile::new(&path))).await;
        let id = FileId::new(1, 7);

        handle
            .commit(vec![
                event("/var/log/a.log", id, 0, 2, false),
                event("/var/log/a.log", id, 2, 2, false),
            ])
            .await
            .unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot, vec![FileState::new("/var/log/a.log", 4, id)]);
        assert_eq!(read_disk(&path).await, snapshot);
    }

    #[tokio::test]
    async fn test_partial_events_not_committed() {
        let dir = TempDir::new().unwrap();
        let (handle, _task) = start(Box::new(RegistryFile::new(dir.path().join("reg")))).await;
        let id = FileId::new(1, 7);

        handle
            .commit(vec![
                event("/var/log/a.log", id, 0, 2, false),
                event("/var/log/a.log", id, 2, 5, true),
            ])
            .await
            .unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot[0].offset, 2);
    }

    #[tokio::test]
    async fn test_resume_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reg");
        let id = FileId::new(3, 9);
        RegistryFile::new(&path)
            .save(&[FileState::new("/var/log/a.log", 120, id)])
            .await
            .unwrap();

        let (handle, _task) = start(Box::new(RegistryFile::new(&path))).await;
        let found = handle
            .fetch_state(Path::new("/var/log/a.log"), id)
            .await
            .unwrap();
        assert_eq!(found, (120, true));
    }

    #[tokio::test]
    async fn test_rename_moves_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reg");
        let id = FileId::new(3, 9);
        RegistryFile::new(&path)
            .save(&[FileState::new("/var/log/a.log", 120, id)])
            .await
            .unwrap();

        let (handle, _task) = start(Box::new(RegistryFile::new(&path))).await;
        let found = handle
            .fetch_state(Path::new("/var/log/a.log.1"), id)
            .await
            .unwrap();
        assert_eq!(found, (120, true));

        let expected = vec![FileState::new("/var/log/a.log.1", 120, id)];
        assert_eq!(handle.snapshot().await.unwrap(), expected);
        assert_eq!(read_disk(&path).await, expected);
    }

    #[tokio::test]
    async fn test_newest_state_wins_shared_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reg");
        let (handle, _task) = start(Box::new(RegistryFile::new(&path))).await;

        handle
            .commit(vec![event("/var/log/a.log", FileId::new(1, 1), 0, 10, false)])
            .await
            .unwrap();
        handle
            .commit(vec![event("/var/log/a.log", FileId::new(1, 2), 0, 3, false)])
            .await
            .unwrap();

        // Both identities live in memory, the file keeps the newest
        assert_eq!(handle.snapshot().await.unwrap().len(), 2);
        assert_eq!(
            read_disk(&path).await,
            vec![FileState::new("/var/log/a.log", 3, FileId::new(1, 2))]
        );
    }

    #[tokio::test]
    async fn test_final_write_on_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("reg");
        let (handle, task) = start(Box::new(RegistryFile::new(&path))).await;
        assert!(path.parent().unwrap().is_dir());

        handle
            .persist(FileState::new("/var/log/old.log", 0, FileId::new(1, 5)))
            .await
            .unwrap();
        drop(handle);
        task.await.unwrap();

        assert_eq!(
            read_disk(&path).await,
            vec![FileState::new("/var/log/old.log", 0, FileId::new(1, 5))]
        );
    }

    struct BrokenStore;

    #[async_trait]
    impl StateStore for BrokenStore {
        async fn init(&self) -> Result<(), RegistryError> {
            Ok(())
        }

        async fn load(&self) -> Result<Vec<FileState>, RegistryError> {
            Ok(Vec::new())
        }

        async fn save(&self, _states: &[FileState]) -> Result<(), RegistryError> {
            Err(RegistryError::Io {
                path: PathBuf::from("/nowhere"),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            })
        }
    }

    #[tokio::test]
    async fn test_write_failure_keeps_memory_state() {
        let (handle, _task) = start(Box::new(BrokenStore)).await;
        let id = FileId::new(1, 1);

        handle
            .commit(vec![event("/var/log/a.log", id, 0, 6, false)])
            .await
            .unwrap();

        assert_eq!(
            handle.fetch_state(Path::new("/var/log/a.log"), id).await.unwrap(),
            (6, true)
        );
    }
}
