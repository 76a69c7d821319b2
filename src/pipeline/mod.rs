pub mod channel;
pub mod publisher;
pub mod runner;
pub mod spooler;

pub use channel::{create_channel, Batch, Receiver, Sender};
pub use publisher::run_publisher;
pub use runner::{Pipeline, PipelineError};
pub use spooler::Spooler;
