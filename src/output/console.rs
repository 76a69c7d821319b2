use super::{OutputError, PublishMode, Sink};
use async_trait::async_trait;
use serde_json::Value;
use std::io::Write;

/// Writes one JSON document per line to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    async fn publish(&self, events: &[Value], mode: PublishMode) -> Result<(), OutputError> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for event in events {
            serde_json::to_writer(&mut out, event)?;
            out.write_all(b"\n")?;
        }
        if mode == PublishMode::Sync {
            out.flush()?;
        }
        Ok(())
    }
}
