use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::DeliveryError;
use crate::config::Config;

// ── Push Message ──────────────────────────────────────────────

/// One entry of the batch posted to the push gateway.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PushMessage {
    pub to: String,
    pub sound: &'static str,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

/// One message per non-blank device token, all sharing the same content.
pub fn build_batch(
    tokens: &[String],
    title: &str,
    body: &str,
    data: &serde_json::Value,
) -> Vec<PushMessage> {
    tokens
        .iter()
        .filter(|t| !t.trim().is_empty())
        .map(|t| PushMessage {
            to: t.clone(),
            sound: "default",
            title: title.to_string(),
            body: body.to_string(),
            data: data.clone(),
        })
        .collect()
}

/// Data attached to every push so the app can open the related message.
pub fn chat_data(message_id: Option<i64>) -> serde_json::Value {
    serde_json::json!({
        "type": "chat",
        "messageId": message_id,
    })
}

// ── Dispatcher ────────────────────────────────────────────────

/// Sends push notifications to users' devices.
///
/// Fire-and-forget: `send` returns before the gateway answers and never
/// reports failure to the caller.
#[async_trait]
pub trait PushDispatcher: Send + Sync {
    async fn send(&self, tokens: &[String], title: &str, body: &str, data: serde_json::Value);
}

/// Posts message batches to an Expo-compatible push gateway.
/// One attempt per batch, no retry.
#[derive(Clone)]
pub struct ExpoPushDispatcher {
    client: reqwest::Client,
    url: String,
    enabled: bool,
}

impl ExpoPushDispatcher {
    pub fn new(url: impl Into<String>, timeout: Duration, enabled: bool) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("taskboard/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            enabled,
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Self::new(
            cfg.push_url.clone(),
            Duration::from_secs(cfg.push_timeout_secs),
            cfg.push_enabled,
        )
    }

    /// Submit one batch and wait for the gateway. Returns the HTTP status.
    pub async fn deliver(&self, batch: &[PushMessage]) -> Result<u16, DeliveryError> {
        let resp = self
            .client
            .post(&self.url)
            .header("accept", "application/json")
            .json(batch)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if status.is_success() {
            info!(
                url = %self.url,
                messages = batch.len(),
                status = %status,
                body = %body,
                "push batch submitted"
            );
            Ok(status.as_u16())
        } else {
            Err(DeliveryError::Gateway {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl PushDispatcher for ExpoPushDispatcher {
    async fn send(&self, tokens: &[String], title: &str, body: &str, data: serde_json::Value) {
        let batch = build_batch(tokens, title, body, &data);
        if batch.is_empty() {
            debug!("push: no device tokens, skipping");
            return;
        }
        if !self.enabled {
            debug!(messages = batch.len(), "push: dispatch disabled, skipping");
            return;
        }

        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.deliver(&batch).await {
                warn!(url = %dispatcher.url, messages = batch.len(), error = %e, "push delivery failed");
            }
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────
