use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::broker::QueueDiagnostics;

/// Connection details for the broker's HTTP management API.
#[derive(Debug, Clone)]
pub struct ManagementConfig {
    /// Base URL, e.g. `http://localhost:15672`.
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub vhost: String,
    pub queue: String,
    pub timeout: Duration,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:15672".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            queue: "orders".to_string(),
            timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueueInfo {
    messages: Option<u64>,
}

/// Reads queue depth from the management API.
///
/// Diagnostic only: every failure is logged and reported as `None`.
#[derive(Debug, Clone)]
pub struct ManagementClient {
    http: reqwest::Client,
    config: ManagementConfig,
}

impl ManagementClient {
    pub fn new(config: ManagementConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self { http, config }
    }

    /// URL of the queue resource, with the vhost percent-encoded.
    pub fn queue_url(&self) -> String {
        format!(
            "{}/api/queues/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.vhost),
            urlencoding::encode(&self.config.queue),
        )
    }

    async fn fetch_depth(&self) -> Result<Option<u64>, reqwest::Error> {
        let info: QueueInfo = self
            .http
            .get(self.queue_url())
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(info.messages)
    }
}

#[async_trait]
impl QueueDiagnostics for ManagementClient {
    async fn messages_in_queue(&self) -> Option<u64> {
        match self.fetch_depth().await {
            Ok(depth) => depth,
            Err(e) => {
                tracing::debug!(error = %e, queue = %self.config.queue, "queue depth unavailable");
                None
            }
        }
    }
}
