use super::channel::{Batch, Receiver};
use super::runner::PipelineError;
use crate::crawler::RegistrarHandle;
use crate::output::{PublishMode, Sink};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const INITIAL_RETRY: Duration = Duration::from_secs(1);
const MAX_RETRY: Duration = Duration::from_secs(60);

/// Publish every batch from the spooler, then hand it to the registrar so
/// its offsets are committed.
///
/// A failing sink is retried with exponential backoff for as long as the
/// pipeline runs. After `stop`, a batch the sink refuses is dropped without
/// committing, so its lines are read again on the next start.
pub async fn run_publisher(
    mut batches: Receiver<Batch>,
    sink: Arc<dyn Sink>,
    registrar: RegistrarHandle,
    mode: PublishMode,
    stop: CancellationToken,
) -> Result<(), PipelineError> {
    let beat = beat_info();
    info!(?mode, "Publisher started");

    while let Some(batch) = batches.recv().await {
        let docs: Vec<Value> = batch
            .iter()
            .map(|event| {
                let mut doc = event.to_document();
                doc["beat"] = beat.clone();
                doc
            })
            .collect();

        if !publish_with_retry(sink.as_ref(), &docs, mode, &stop).await {
            error!(events = batch.len(), "Dropping unpublished batch on shutdown");
            continue;
        }

        debug!(events = batch.len(), "Published batch");
        registrar.commit(batch).await?;
    }

    info!("Publisher stopped");
    Ok(())
}

async fn publish_with_retry(
    sink: &dyn Sink,
    docs: &[Value],
    mode: PublishMode,
    stop: &CancellationToken,
) -> bool {
    let mut backoff = INITIAL_RETRY;
    loop {
        let err = match sink.publish(docs, mode).await {
            Ok(()) => return true,
            Err(e) => e,
        };

        if stop.is_cancelled() {
            warn!(error = %err, "Failed to publish batch while stopping");
            return false;
        }

        warn!(error = %err, retry_in = ?backoff, "Failed to publish batch");
        tokio::select! {
            _ = sleep(backoff) => {}
            _ = stop.cancelled() => {}
        }
        backoff = (backoff * 2).min(MAX_RETRY);
    }
}

fn beat_info() -> Value {
    let hostname = hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    json!({
        "name": hostname,
        "hostname": hostname,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::Registrar;
    use crate::input::{FileEvent, FileId, FileInfo, FileState};
    use crate::output::OutputError;
    use crate::pipeline::channel::create_channel;
    use crate::storage::RegistryFile;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::SystemTime;
    use tempfile::TempDir;

    /// Fails the first `failures` calls, then records what it is given.
    struct FlakySink {
        failures: AtomicUsize,
        published: Mutex<Vec<Value>>,
    }

    impl FlakySink {
        fn new(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                published: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Sink for FlakySink {
        async fn publish(&self, events: &[Value], _mode: PublishMode) -> Result<(), OutputError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(OutputError::Closed);
            }
            self.published.lock().unwrap().extend_from_slice(events);
            Ok(())
        }
    }

    fn event(offset: u64, text: &str) -> FileEvent {
        FileEvent {
            read_time: Utc::now(),
            source: Arc::new(PathBuf::from("/var/log/app.log")),
            input_type: Arc::from("log"),
            document_type: Arc::from("log"),
            offset,
            bytes: text.len() + 1,
            text: text.to_string(),
            fields: Arc::new(HashMap::new()),
            fields_under_root: false,
            file_info: FileInfo {
                file_id: FileId::new(1, 1),
                size: 0,
                modified: SystemTime::UNIX_EPOCH,
            },
            is_partial: false,
        }
    }

    async fn registrar(dir: &TempDir) -> RegistrarHandle {
        let store = RegistryFile::new(dir.path().join("registry"));
        let (registrar, handle) = Registrar::new(Box::new(store)).await.unwrap();
        tokio::spawn(registrar.run());
        handle
    }

    #[tokio::test]
    async fn test_publishes_then_commits() {
        let dir = TempDir::new().unwrap();
        let handle = registrar(&dir).await;
        let sink = Arc::new(FlakySink::new(0));
        let (tx, rx) = create_channel(1);

        let task = tokio::spawn(run_publisher(
            rx,
            sink.clone(),
            handle.clone(),
            PublishMode::Sync,
            CancellationToken::new(),
        ));
        tx.send(vec![event(0, "A"), event(2, "B")]).await.unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        let published = sink.published.lock().unwrap().clone();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0]["message"], "A");
        assert!(published[1]["beat"]["hostname"].is_string());

        assert_eq!(
            handle.snapshot().await.unwrap(),
            vec![FileState::new("/var/log/app.log", 4, FileId::new(1, 1))]
        );
    }

    #[tokio::test]
    async fn test_retries_failed_publish() {
        let dir = TempDir::new().unwrap();
        let handle = registrar(&dir).await;
        let sink = Arc::new(FlakySink::new(1));
        let (tx, rx) = create_channel(1);

        let task = tokio::spawn(run_publisher(
            rx,
            sink.clone(),
            handle.clone(),
            PublishMode::Sync,
            CancellationToken::new(),
        ));
        tx.send(vec![event(0, "A")]).await.unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        assert_eq!(sink.published.lock().unwrap().len(), 1);
        assert_eq!(handle.snapshot().await.unwrap()[0].offset, 2);
    }

    #[tokio::test]
    async fn test_stopped_publisher_does_not_commit() {
        let dir = TempDir::new().unwrap();
        let handle = registrar(&dir).await;
        let sink = Arc::new(FlakySink::new(usize::MAX));
        let (tx, rx) = create_channel(1);
        let stop = CancellationToken::new();
        stop.cancel();

        let task = tokio::spawn(run_publisher(
            rx,
            sink,
            handle.clone(),
            PublishMode::Sync,
            stop,
        ));
        tx.send(vec![event(0, "A")]).await.unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        assert!(handle.snapshot().await.unwrap().is_empty());
    }
}
