use super::channel::{Batch, Receiver, Sender};
use crate::input::FileEvent;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Collects events into batches, flushing when `spool_size` events have
/// piled up or `idle_timeout` has passed since the last flush.
pub struct Spooler {
    spool_size: usize,
    idle_timeout: Duration,
}

impl Spooler {
    pub fn new(spool_size: usize, idle_timeout: Duration) -> Self {
        Self {
            spool_size: spool_size.max(1),
            idle_timeout,
        }
    }

    /// Runs until every event sender is gone, then flushes what is left.
    pub async fn run(self, mut input: Receiver<FileEvent>, output: Sender<Batch>) {
        let half = (self.idle_timeout / 2).max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + half, half);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut buffer: Batch = Vec::with_capacity(self.spool_size);
        let mut next_flush = Instant::now() + self.idle_timeout;

        info!(
            spool_size = self.spool_size,
            idle_timeout = ?self.idle_timeout,
            "Spooler started"
        );

        loop {
            tokio::select! {
                event = input.recv() => {
                    let Some(event) = event else {
                        break;
                    };

                    // A lone event waits at most one idle timeout
                    if buffer.is_empty() {
                        next_flush = next_flush.min(Instant::now() + half);
                    }
                    buffer.push(event);

                    if buffer.len() >= self.spool_size
                        && !self.flush(&mut buffer, &mut next_flush, &output).await
                    {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if Instant::now() >= next_flush
                        && !self.flush(&mut buffer, &mut next_flush, &output).await
                    {
                        return;
                    }
                }
            }
        }

        self.flush(&mut buffer, &mut next_flush, &output).await;
        info!("Spooler stopped");
    }

    /// Hand the buffered events on as one batch. Returns false once nobody
    /// receives batches any more.
    async fn flush(
        &self,
        buffer: &mut Batch,
        next_flush: &mut Instant,
        output: &Sender<Batch>,
    ) -> bool {
        *next_flush = Instant::now() + self.idle_timeout;
        if buffer.is_empty() {
            return true;
        }

        let batch = std::mem::replace(buffer, Vec::with_capacity(self.spool_size));
        debug!(events = batch.len(), "Flushing spooler");

        if output.send(batch).await.is_err() {
            error!("Publisher is gone, stopping spooler");
            return false;
        }
        true
    }
}
