//! Fire-and-forget export dispatch.
//!
//! After a lead event is appended, the pipeline hands its id to this
//! trigger, which POSTs the export endpoint from a detached task with a
//! bounded timeout. Every failure mode (timeout, connection error, non-2xx
//! response) is logged and swallowed: the inbound webhook request has
//! already succeeded and nothing downstream may change that.

use leadgate_core::export::ExportTrigger;
use leadgate_core::LeadEventId;
use std::time::Duration;
use tracing::{debug, warn};

/// [`ExportTrigger`] that POSTs the export endpoint over HTTP
pub struct HttpExportTrigger {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpExportTrigger {
    /// Create a trigger targeting the given export endpoint
    pub fn new(endpoint: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            timeout,
        }
    }
}

impl ExportTrigger for HttpExportTrigger {
    fn trigger(&self, lead_event_id: LeadEventId) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let body = serde_json::json!({"lead_event_id": lead_event_id.to_string()});
            let request = client.post(&endpoint).json(&body).send();

            match tokio::time::timeout(timeout, request).await {
                Ok(Ok(response)) if response.status().is_success() => {
                    debug!(%lead_event_id, "Export trigger delivered");
                }
                Ok(Ok(response)) => {
                    warn!(
                        %lead_event_id,
                        status = %response.status(),
                        "Export trigger got a non-success response"
                    );
                }
                Ok(Err(error)) => {
                    warn!(%lead_event_id, error = %error, "Export trigger request failed");
                }
                Err(_) => {
                    warn!(
                        %lead_event_id,
                        timeout_secs = timeout.as_secs(),
                        "Export trigger timed out"
                    );
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "export_trigger_tests.rs"]
mod tests;
