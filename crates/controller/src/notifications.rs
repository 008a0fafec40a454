//! Operator notification fan-out.
//!
//! Delivery is best effort: every sender is tried independently and a
//! failing sender never blocks the others.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use sitefleet_config::NotificationsConfig;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Notification delivery errors
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid sender options: {0}")]
    Options(String),

    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// An operator alert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub severity: Severity,
    pub subject: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(severity: Severity, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            subject: subject.into(),
            message: message.into(),
            domain: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// A notification destination
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Sender name for logs
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Posts notifications as JSON to a URL
#[derive(Debug, Clone)]
pub struct WebhookSender {
    url: reqwest::Url,
    /// Host-only label; the path and query may carry credentials
    name: String,
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(url: &str) -> Result<Self, NotifyError> {
        let url = reqwest::Url::parse(url).map_err(|e| NotifyError::Options(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NotifyError::Options(format!(
                "unsupported webhook scheme '{}'",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| NotifyError::Options("webhook URL has no host".to_string()))?;
        let name = match url.port() {
            Some(port) => format!("webhook:{}:{}", host, port),
            None => format!("webhook:{}", host),
        };
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self { url, name, client })
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(notification)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        debug!(sender = %self.name, status = status.as_u16(), "Webhook delivered");
        Ok(())
    }
}

/// Writes notifications to the log
#[derive(Debug, Clone, Default)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let domain = notification.domain.as_deref().unwrap_or("-");
        match notification.severity {
            Severity::Info => info!(
                domain = %domain,
                subject = %notification.subject,
                "{}", notification.message
            ),
            Severity::Warning => warn!(
                domain = %domain,
                subject = %notification.subject,
                "{}", notification.message
            ),
            Severity::Critical => error!(
                domain = %domain,
                subject = %notification.subject,
                "{}", notification.message
            ),
        }
        Ok(())
    }
}

/// Fans notifications out to every configured sender
#[derive(Clone, Default)]
pub struct Notifier {
    senders: Vec<Arc<dyn NotificationSender>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sender(mut self, sender: Arc<dyn NotificationSender>) -> Self {
        self.senders.push(sender);
        self
    }

    /// Build the senders named in the configuration
    pub fn from_config(config: &NotificationsConfig) -> Result<Self, NotifyError> {
        let mut notifier = Self::new();
        for url in &config.webhooks {
            notifier = notifier.with_sender(Arc::new(WebhookSender::new(url)?));
        }
        if config.log {
            notifier = notifier.with_sender(Arc::new(LogSender));
        }
        info!(senders = notifier.len(), "Notification senders configured");
        Ok(notifier)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Send to every sender concurrently; returns how many succeeded.
    pub async fn notify(&self, notification: &Notification) -> usize {
        if self.senders.is_empty() {
            debug!(subject = %notification.subject, "No notification senders, dropping");
            return 0;
        }

        let results = join_all(self.senders.iter().map(|sender| async move {
            (sender.name().to_string(), sender.send(notification).await)
        }))
        .await;

        let mut delivered = 0;
        for (name, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => warn!(sender = %name, error = %e, "Failed to deliver notification"),
            }
        }
        delivered
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.senders.iter().map(|s| s.name()).collect();
        f.debug_struct("Notifier").field("senders", &names).finish()
    }
}
