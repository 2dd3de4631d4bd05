//! Alert delivery

use crate::collaborators::{async_trait, CollabResult, NotificationSink, Severity};
use crate::error::CollaboratorError;
use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

const SERVICE: &str = "webhook";

#[derive(Debug, Serialize)]
struct AlertPayload<'a> {
    severity: Severity,
    subject: &'a str,
    message: &'a str,
    source: &'static str,
    timestamp: String,
}

/// Posts alerts as JSON to a webhook
pub struct WebhookNotifier {
    client: Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        let url = Url::parse(url).context("Invalid webhook URL")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn publish(&self, severity: Severity, subject: &str, message: &str) -> CollabResult<()> {
        let payload = AlertPayload {
            severity,
            subject,
            message,
            source: "gpu-fleet-optimizer",
            timestamp: Utc::now().to_rfc3339(),
        };

        let response = self
            .client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| CollaboratorError::transport(SERVICE, e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status {
                service: SERVICE,
                status,
                body,
            });
        }

        info!(severity = %severity, subject = %subject, "Alert published");
        Ok(())
    }
}

/// Writes alerts to the log when no webhook is configured
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn publish(&self, severity: Severity, subject: &str, message: &str) -> CollabResult<()> {
        match severity {
            Severity::Critical => error!(subject = %subject, message = %message, "Alert"),
            Severity::Warning => warn!(subject = %subject, message = %message, "Alert"),
            Severity::Info => info!(subject = %subject, message = %message, "Alert"),
        }
        Ok(())
    }
}
