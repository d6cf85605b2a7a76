//! Stateless HTTP transport used when the persistent channel is down.
//!
//! `GET {base}/ping/{namespace}` returns the group snapshot,
//! `POST {base}/broadcast/{namespace}` sends one update. Both calls are
//! bounded by the configured request timeout; any non-2xx status is an
//! error for the caller to log.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tokio::sync::watch;

use super::Transport;
use crate::config::{ServerAddress, SyncConfig};
use crate::error::TransportError;
use crate::protocol::{snapshot_from_value, PartialUpdate, Snapshot};

const JSON_UTF8: &str = "application/json; charset=utf-8";

/// Request/response fallback transport.
pub struct PollingTransport {
    client: reqwest::Client,
    namespace: String,
    config: watch::Receiver<SyncConfig>,
}

impl PollingTransport {
    pub fn new(namespace: impl Into<String>, config: watch::Receiver<SyncConfig>) -> Self {
        Self {
            client: reqwest::Client::new(),
            namespace: namespace.into(),
            config,
        }
    }

    fn endpoint(&self, action: &str) -> Result<(String, Duration), TransportError> {
        let config = self.config.borrow();
        let address = ServerAddress::parse(&config.server_address)?;
        let url = address.http_url(&format!("/{action}/{}", self.namespace));
        Ok((url, config.request_timeout))
    }

    pub fn ping_url(&self) -> Result<String, TransportError> {
        self.endpoint("ping").map(|(url, _)| url)
    }

    pub fn broadcast_url(&self) -> Result<String, TransportError> {
        self.endpoint("broadcast").map(|(url, _)| url)
    }
}

fn request_error(err: reqwest::Error, wait: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(wait)
    } else {
        TransportError::Request(err.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status { status: status.as_u16(), body })
}

impl Transport for PollingTransport {
    fn name(&self) -> &'static str {
        "polling"
    }

    /// Polling has no connection lifecycle.
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    fn is_connected(&self) -> bool {
        false
    }

    async fn ping(&self) -> Result<Snapshot, TransportError> {
        let (url, wait) = self.endpoint("ping")?;
        log::trace!("GET {url}");
        let response = self
            .client
            .get(&url)
            .timeout(wait)
            .send()
            .await
            .map_err(|e| request_error(e, wait))?;
        let body: serde_json::Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        Ok(snapshot_from_value(body)?)
    }

    async fn broadcast(&self, update: &PartialUpdate) -> Result<(), TransportError> {
        let (url, wait) = self.endpoint("broadcast")?;
        let body = serde_json::to_string(update)?;
        log::trace!("POST {url} {body}");
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, JSON_UTF8)
            .body(body)
            .timeout(wait)
            .send()
            .await
            .map_err(|e| request_error(e, wait))?;
        check_status(response).await.map(|_| ())
    }
}
