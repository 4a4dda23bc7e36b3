//! Message sink for alert fan-out.

pub mod log;
pub mod memory;
pub mod webhook;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::AlertsConfig;
use crate::storage::SinkError;

/// Publish/subscribe collaborator. Payloads are opaque bytes.
#[async_trait]
pub trait MessageSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), SinkError>;
}

/// Topic an alert for `device` is published under.
pub fn alert_topic(prefix: &str, device: &str) -> String {
    format!("{}/alerts/{}", prefix.trim_end_matches('/'), device)
}

/// Drops every message. Selected when `alerts.enabled = false`.
pub struct DisabledPublisher;

#[async_trait]
impl MessageSink for DisabledPublisher {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn publish(&self, topic: &str, _payload: &[u8]) -> Result<(), SinkError> {
        tracing::debug!(topic, "alert publishing disabled, dropping message");
        Ok(())
    }
}

/// Build the publisher selected in the alerts configuration.
pub fn open_publisher(config: &AlertsConfig) -> Result<Arc<dyn MessageSink>> {
    if !config.enabled {
        return Ok(Arc::new(DisabledPublisher));
    }
    let sink: Arc<dyn MessageSink> = match config.webhook_url.as_deref() {
        Some(url) if !url.trim().is_empty() => {
            Arc::new(webhook::WebhookPublisher::new(url, config)?)
        }
        _ => Arc::new(log::LogPublisher),
    };
    Ok(sink)
}
