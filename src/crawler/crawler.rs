use super::prospector::Prospector;
use super::registrar::RegistrarHandle;
use crate::config::ProspectorConfig;
use crate::input::FileEvent;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Runs one prospector per configured group of paths.
pub struct Crawler {
    prospectors: Vec<JoinHandle<()>>,
}

impl Crawler {
    /// Spawn the prospectors and wait until each has finished its first scan.
    ///
    /// `events` is only cloned into prospectors, so once they and their
    /// harvesters are gone the receiving side sees the channel close.
    pub async fn start(
        configs: &[ProspectorConfig],
        registrar: &RegistrarHandle,
        events: mpsc::Sender<FileEvent>,
        stop: CancellationToken,
    ) -> Self {
        let mut prospectors = Vec::with_capacity(configs.len());
        let mut ready = Vec::with_capacity(configs.len());

        for config in configs {
            let (ready_tx, ready_rx) = oneshot::channel();
            let prospector = Prospector::new(
                config.clone(),
                registrar.clone(),
                events.clone(),
                stop.clone(),
            );
            prospectors.push(tokio::spawn(prospector.run(ready_tx)));
            ready.push(ready_rx);
        }
        drop(events);

        join_all(ready).await;
        info!(prospectors = prospectors.len(), "All prospectors initialised");

        Self { prospectors }
    }

    /// Wait for every prospector to return; they do so once stopped and
    /// their harvesters have finished.
    pub async fn wait(self) -> Result<(), JoinError> {
        for result in join_all(self.prospectors).await {
            result?;
        }
        Ok(())
    }
}
