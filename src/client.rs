//! Shared HTTP client for remote service calls and webhook deliveries.
//!
//! One pooled `reqwest::Client` for the whole process. Remote service calls
//! carry the shared API key; webhook POSTs are best-effort and never fail
//! the caller.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::error::NodeError;

struct ClientInner {
    http: reqwest::Client,
    api_key: SecretString,
    service_url: String,
}

/// Cheaply cloneable handle to the process-wide HTTP client.
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<ClientInner>,
}

impl ServiceClient {
    pub fn new(api_key: SecretString, service_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            inner: Arc::new(ClientInner {
                http,
                api_key,
                service_url: service_url.into(),
            }),
        }
    }

    /// Base URL of this service instance.
    pub fn service_url(&self) -> &str {
        &self.inner.service_url
    }

    /// The webhook URL injected into outbound remote requests.
    pub fn webhook_url(&self) -> String {
        format!("{}/webhook", self.inner.service_url)
    }

    /// POST a JSON body to a remote service and parse the JSON response.
    ///
    /// Non-2xx responses surface as `NodeError::RemoteService` with the
    /// status and body captured.
    pub async fn post_json(&self, url: &str, body: &Value) -> Result<Value, NodeError> {
        tracing::debug!(url = %url, "POST to remote service");

        let response = self
            .inner
            .http
            .post(url)
            .header("X-API-Key", self.inner.api_key.expose_secret())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(url = %url, status = %status, "Remote service request failed");
            return Err(NodeError::RemoteService {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    /// POST a webhook payload. Best-effort: non-200 responses and transport
    /// errors are logged at ERROR and swallowed, never retried.
    pub async fn post_webhook(&self, url: &str, payload: &Value) {
        match self.inner.http.post(url).json(payload).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::error!(
                    url = %url,
                    status = %response.status(),
                    "Webhook delivery returned non-success status"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(url = %url, "Failed to deliver webhook: {}", e);
            }
        }
    }
}
