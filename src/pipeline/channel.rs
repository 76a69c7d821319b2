use crate::input::FileEvent;
use tokio::sync::mpsc;

pub type Sender<T> = mpsc::Sender<T>;
pub type Receiver<T> = mpsc::Receiver<T>;

/// Events flushed together to the output.
pub type Batch = Vec<FileEvent>;

/// Events on their way from the harvesters to the spooler.
pub const EVENT_QUEUE_SIZE: usize = 16;

/// Batches waiting for the publisher. Kept small so a slow output stalls the
/// spooler, and through it the harvesters, instead of buffering.
pub const BATCH_QUEUE_SIZE: usize = 1;

/// Create a bounded channel with the specified buffer size
pub fn create_channel<T>(buffer_size: usize) -> (Sender<T>, Receiver<T>) {
    mpsc::channel(buffer_size.max(1))
}
