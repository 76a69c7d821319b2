use super::channel::{create_channel, BATCH_QUEUE_SIZE, EVENT_QUEUE_SIZE};
use super::publisher::run_publisher;
use super::spooler::Spooler;
use crate::config::Config;
use crate::crawler::{Crawler, Registrar, RegistrarClosed, RegistrarHandle};
use crate::output::Sink;
use crate::storage::{RegistryError, RegistryFile};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Errors that can occur during pipeline operation
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    RegistrarClosed(#[from] RegistrarClosed),

    #[error("task failed: {0}")]
    Join(#[from] JoinError),
}

/// A running set of prospectors, spooler, publisher and registrar.
pub struct Pipeline {
    stop: CancellationToken,
    registrar: RegistrarHandle,
    crawler: Crawler,
    spooler: JoinHandle<()>,
    publisher: JoinHandle<Result<(), PipelineError>>,
    registrar_task: JoinHandle<()>,
}

impl Pipeline {
    /// Load the registry and start every stage. Returns once each prospector
    /// has completed its first scan.
    pub async fn start(config: &Config, sink: Arc<dyn Sink>) -> Result<Self, PipelineError> {
        let settings = &config.tailbeat;

        let store = RegistryFile::new(&settings.registry_file);
        info!(path = %store.path().display(), "Using registry file");
        let (registrar, handle) = Registrar::new(Box::new(store)).await?;
        let registrar_task = tokio::spawn(registrar.run());

        let stop = CancellationToken::new();
        let (event_tx, event_rx) = create_channel(EVENT_QUEUE_SIZE);
        let (batch_tx, batch_rx) = create_channel(BATCH_QUEUE_SIZE);

        let spooler = tokio::spawn(
            Spooler::new(settings.spool_size, settings.idle_timeout).run(event_rx, batch_tx),
        );
        let publisher = tokio::spawn(run_publisher(
            batch_rx,
            sink,
            handle.clone(),
            config.output.publish_mode,
            stop.clone(),
        ));

        let crawler = Crawler::start(&settings.prospectors, &handle, event_tx, stop.clone()).await;
        info!("Pipeline started");

        Ok(Self {
            stop,
            registrar: handle,
            crawler,
            spooler,
            publisher,
            registrar_task,
        })
    }

    pub fn registrar(&self) -> &RegistrarHandle {
        &self.registrar
    }

    /// Stop reading and drain every stage in order. Returns once the final
    /// registry write is done.
    pub async fn shutdown(self) -> Result<(), PipelineError> {
        let Pipeline {
            stop,
            registrar,
            crawler,
            spooler,
            publisher,
            registrar_task,
        } = self;

        info!("Stopping pipeline");
        stop.cancel();

        // Prospectors return after their harvesters, which drops the last
        // event senders and lets the spooler flush and finish
        crawler.wait().await?;
        spooler.await?;
        let published = publisher.await?;

        drop(registrar);
        registrar_task.await?;

        info!("Pipeline stopped");
        published
    }
}
