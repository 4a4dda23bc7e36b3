//! HTTP bridge publisher.
//!
//! Each message becomes `POST {base}/{topic}` with the payload as a JSON body.
//! Topic levels are percent-encoded one path segment each. Any non-2xx
//! response is reported as a rejection.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Certificate, Client, Request, Url};

use super::MessageSink;
use crate::config::AlertsConfig;
use crate::storage::SinkError;

/// Credential attached to every bridge request.
#[derive(Debug, Clone, PartialEq)]
enum BridgeAuth {
    Anonymous,
    Basic {
        username: String,
        password: Option<String>,
    },
    Bearer(String),
}

impl BridgeAuth {
    fn from_config(config: &AlertsConfig) -> Self {
        match (&config.username, &config.token) {
            (Some(username), _) => Self::Basic {
                username: username.clone(),
                password: config.password.clone(),
            },
            (None, Some(token)) => Self::Bearer(token.clone()),
            (None, None) => Self::Anonymous,
        }
    }
}

pub struct WebhookPublisher {
    client: Client,
    base: Url,
    auth: BridgeAuth,
}

impl WebhookPublisher {
    pub fn new(base: &str, config: &AlertsConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        if let Some(ca_file) = &config.ca_file {
            let pem = std::fs::read(ca_file)
                .with_context(|| format!("failed to read alerts.ca_file: {}", ca_file.display()))?;
            let cert = Certificate::from_pem(&pem)
                .with_context(|| format!("invalid PEM in alerts.ca_file: {}", ca_file.display()))?;
            builder = builder.add_root_certificate(cert);
        }

        let base = Url::parse(base.trim())
            .with_context(|| format!("invalid alerts.webhook_url: {base}"))?;
        if base.cannot_be_a_base() {
            bail!("alerts.webhook_url cannot carry a path: {base}");
        }

        Ok(Self {
            client: builder.build()?,
            base,
            auth: BridgeAuth::from_config(config),
        })
    }

    pub fn url_for(&self, topic: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(topic.split('/').filter(|level| !level.is_empty()));
        }
        url
    }

    fn request(&self, topic: &str, payload: &[u8]) -> reqwest::Result<Request> {
        let builder = self
            .client
            .post(self.url_for(topic))
            .header("Content-Type", "application/json")
            .body(payload.to_vec());
        let builder = match &self.auth {
            BridgeAuth::Anonymous => builder,
            BridgeAuth::Basic { username, password } => builder.basic_auth(username, password.as_ref()),
            BridgeAuth::Bearer(token) => builder.bearer_auth(token),
        };
        builder.build()
    }
}

#[async_trait]
impl MessageSink for WebhookPublisher {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), SinkError> {
        let resp = self.client.execute(self.request(topic, payload)?).await?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(topic, status = status.as_u16(), "alert delivered");
            return Ok(());
        }
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        })
    }
}
