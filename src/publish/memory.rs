use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::MessageSink;
use crate::storage::SinkError;

/// Records every `(topic, payload)` pair in memory.
#[derive(Clone, Default)]
pub struct MemoryPublisher {
    messages: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl MessageSink for MemoryPublisher {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), SinkError> {
        self.messages
            .lock()
            .await
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}
