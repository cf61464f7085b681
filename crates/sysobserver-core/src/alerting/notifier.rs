//! Notification delivery

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use metrics::counter;
use tracing::{debug, error, warn};

use crate::config::{NotificationConfig, SinkKind};
use crate::error::{Error, Result};

/// Discord rejects messages longer than this
const DISCORD_MAX_CONTENT: usize = 2000;

/// Delivers a rendered message to a channel
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Deliver one message; no retries
    async fn send(&self, text: &str) -> std::result::Result<(), NotificationError>;
}

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("{sink} returned {status}: {body}")]
    Status {
        sink: String,
        status: u16,
        body: String,
    },

    #[error("Sink configuration error: {0}")]
    Config(String),
}

impl From<NotificationError> for Error {
    fn from(e: NotificationError) -> Self {
        match e {
            NotificationError::Config(msg) => Error::config(msg),
            other => Error::delivery(other.to_string()),
        }
    }
}

/// Send `text` through `sink`, logging a failure instead of returning it.
///
/// Returns whether the sink accepted the message.
pub async fn deliver(sink: &dyn NotificationSink, text: &str) -> bool {
    match sink.send(text).await {
        Ok(()) => {
            debug!(sink = sink.name(), "Notification handed over");
            true
        }
        Err(e) => {
            error!(sink = sink.name(), error = %e, "Notification delivery failed");
            counter!("sysobserver_delivery_failures_total").increment(1);
            false
        }
    }
}

/// Build the sink described by the configuration
pub fn build_sink(config: &NotificationConfig, host: &str) -> Result<Arc<dyn NotificationSink>> {
    match config.kind {
        SinkKind::Log => Ok(Arc::new(LogSink)),
        kind => {
            let url = config
                .url
                .clone()
                .ok_or_else(|| Error::config("notification.url is required"))?;
            let sink = WebhookSink::new(kind, url, config.timeout)?
                .with_headers(config.headers.clone())
                .with_host(host);
            Ok(Arc::new(sink))
        }
    }
}

/// Writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, text: &str) -> std::result::Result<(), NotificationError> {
        warn!(target: "sysobserver::notification", "{}", text);
        Ok(())
    }
}

/// Posts notifications to a Discord, Slack or generic JSON webhook
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    kind: SinkKind,
    url: String,
    headers: HashMap<String, String>,
    host: String,
}

impl WebhookSink {
    /// Create a new webhook sink
    pub fn new(
        kind: SinkKind,
        url: impl Into<String>,
        timeout: Duration,
    ) -> std::result::Result<Self, NotificationError> {
        if kind == SinkKind::Log {
            return Err(NotificationError::Config(
                "webhook sink cannot use the log kind".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            kind,
            url: url.into(),
            headers: HashMap::new(),
            host: String::new(),
        })
    }

    /// Extra headers sent with every request
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Host name reported in generic payloads
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    fn payload(&self, text: &str) -> serde_json::Value {
        match self.kind {
            SinkKind::Discord => serde_json::to_value(DiscordPayload {
                content: truncate(text, DISCORD_MAX_CONTENT),
            }),
            SinkKind::Slack => serde_json::to_value(SlackPayload { text }),
            SinkKind::Webhook | SinkKind::Log => serde_json::to_value(WebhookPayload {
                text,
                host: &self.host,
                timestamp: Utc::now().to_rfc3339(),
            }),
        }
        .unwrap_or_else(|_| serde_json::json!({ "text": text }))
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        match self.kind {
            SinkKind::Discord => "discord",
            SinkKind::Slack => "slack",
            SinkKind::Webhook | SinkKind::Log => "webhook",
        }
    }

    async fn send(&self, text: &str) -> std::result::Result<(), NotificationError> {
        let mut request = self.client.post(&self.url).json(&self.payload(text));

        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Status {
                sink: self.name().to_string(),
                status,
                body,
            });
        }

        debug!(sink = self.name(), "Notification delivered");
        Ok(())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[derive(Debug, Serialize)]
struct DiscordPayload {
    content: String,
}

#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
    host: &'a str,
    timestamp: String,
}
