//! Periodic GET probes that keep REST endpoint state current

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::endpoint::EndpointHandle;
use crate::io::ApiRequest;

/// Polls one endpoint URL on a fixed interval
#[derive(Debug)]
pub struct Probe {
    endpoint: EndpointHandle,
    url: String,
    interval: Duration,
}

impl Probe {
    pub fn new(endpoint: EndpointHandle, url: impl Into<String>, interval: Duration) -> Self {
        Self {
            endpoint,
            url: url.into(),
            interval,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Poll until cancelled; every outcome is recorded on the endpoint
    pub async fn run(self, api: Arc<ApiClient>, cancel: CancellationToken) {
        let name = self.endpoint.name().to_string();
        loop {
            match api.request(&self.endpoint, ApiRequest::get(&self.url)).await {
                Ok((_, status)) => tracing::debug!("Probe '{}' -> {}", name, status),
                Err(e) => tracing::debug!("Probe '{}' failed: {}", name, e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => {
                    tracing::debug!("Probe for '{}' cancelled", name);
                    break;
                }
            }
        }
    }
}
