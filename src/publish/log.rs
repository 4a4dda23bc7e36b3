use async_trait::async_trait;

use super::MessageSink;
use crate::storage::SinkError;

/// Writes each message as a structured log line.
pub struct LogPublisher;

#[async_trait]
impl MessageSink for LogPublisher {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), SinkError> {
        let body = std::str::from_utf8(payload)
            .map_err(|e| SinkError::Encode(format!("payload is not UTF-8: {e}")))?;
        tracing::info!(topic, payload = body, "alert published");
        Ok(())
    }
}
