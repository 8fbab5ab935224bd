use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use vigil_core::{Alert, LogTransport, NotificationTransport, TransportError};

use crate::config::Config;

/// Posts alerts as JSON to an HTTP endpoint (mail relay, chat hook, etc).
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
    auth: Option<String>,
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    recipients: &'a [String],
    #[serde(flatten)]
    alert: &'a Alert,
}

impl WebhookTransport {
    pub fn new(url: String, auth: Option<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TransportError::Unreachable(format!("http client: {e}")))?;
        Ok(Self { client, url, auth })
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &Alert, recipients: &[String]) -> Result<(), TransportError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&WebhookBody { recipients, alert });
        if let Some(auth) = &self.auth {
            request = request.header("Authorization", auth);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Rejected(format!("{} returned {status}", self.url)));
        }
        tracing::info!(
            cluster = ?alert.cluster_id,
            recipients = recipients.len(),
            "alert delivered"
        );
        Ok(())
    }
}

/// Webhook delivery when a URL is configured, otherwise log-only.
pub fn build_transport(config: &Config) -> Result<Arc<dyn NotificationTransport>, TransportError> {
    match &config.webhook_url {
        Some(url) => Ok(Arc::new(WebhookTransport::new(url.clone(), config.webhook_auth.clone())?)),
        None => Ok(Arc::new(LogTransport)),
    }
}
