//! Engine status channel
//!
//! The engine exposes its registration state through a local API that must
//! be polled. This module provides the wire types and an HTTP client for it.

use crate::vpn::state::{ConnectionSnapshot, SnapshotError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Error reported by the engine in its status document
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineFault {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Per-peer state as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub is_relay: bool,
}

/// Status document returned by the engine's local API
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineStatus {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub registered: Option<bool>,
    #[serde(default)]
    pub terminated: bool,
    #[serde(default)]
    pub error: Option<EngineFault>,
    #[serde(default)]
    pub peers: Option<HashMap<String, PeerStatus>>,
}

impl EngineStatus {
    /// Reduce the status document to the fields the state machine consumes
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            connected: self.connected,
            registered: self.registered,
            terminated: self.terminated,
            error: self.error.as_ref().map(|fault| SnapshotError {
                code: fault.code.clone(),
                message: fault.message.clone(),
            }),
        }
    }

    /// Number of peers with an established connection
    pub fn connected_peers(&self) -> usize {
        self.peers
            .as_ref()
            .map(|peers| peers.values().filter(|p| p.connected).count())
            .unwrap_or(0)
    }
}

/// Errors that can occur while querying the status channel
///
/// All of these are transient from the session's point of view: the engine
/// may simply not be listening yet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    #[error("Invalid status endpoint: {0}")]
    InvalidUrl(String),

    #[error("Status channel unreachable: {0}")]
    Unreachable(String),

    #[error("Status request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Status channel returned HTTP {0}")]
    BadStatus(u16),

    #[error("Malformed status document: {0}")]
    Decode(String),
}

/// A source of engine status documents
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self) -> Result<EngineStatus, StatusError>;
}

/// Queries the engine's local HTTP API
#[derive(Debug)]
pub struct HttpStatusSource {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpStatusSource {
    /// Create a new status source
    ///
    /// # Arguments
    /// * `endpoint` - HTTP URL of the engine's status resource
    /// * `timeout` - Maximum duration to wait for a response
    #[tracing::instrument(skip(timeout), fields(endpoint = %endpoint, timeout_ms = timeout.as_millis()))]
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, StatusError> {
        let url = Url::parse(&endpoint)
            .map_err(|e| StatusError::InvalidUrl(format!("Failed to parse URL: {}", e)))?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(StatusError::InvalidUrl(format!(
                    "Only HTTP/HTTPS schemes are supported, got: {}",
                    scheme
                )));
            }
        }

        let client = Client::builder()
            .timeout(timeout)
            .use_rustls_tls()
            .build()
            .map_err(|e| StatusError::InvalidUrl(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self) -> Result<EngineStatus, StatusError> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StatusError::Timeout(self.timeout)
                } else {
                    StatusError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            debug!(endpoint = %self.endpoint, status = %status, "Status channel returned error status");
            return Err(StatusError::BadStatus(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| StatusError::Unreachable(e.to_string()))?;

        serde_json::from_slice(&body).map_err(|e| StatusError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_document_decodes_with_missing_fields() {
        let status: EngineStatus = serde_json::from_str(r#"{"connected":true}"#).unwrap();
        assert!(status.connected);
        assert_eq!(status.registered, None);
        assert!(!status.terminated);
        assert_eq!(status.connected_peers(), 0);
    }

    #[test]
    fn test_snapshot_carries_error() {
        let status: EngineStatus = serde_json::from_str(
            r#"{"connected":false,"registered":false,"error":{"code":"ORG_ACCESS_DENIED","message":"no access"}}"#,
        )
        .unwrap();
        let snapshot = status.snapshot();
        assert_eq!(snapshot.registered, Some(false));
        assert_eq!(snapshot.error.unwrap().code, "ORG_ACCESS_DENIED");
    }

    #[test]
    fn test_connected_peers() {
        let status: EngineStatus = serde_json::from_str(
            r#"{"connected":true,"registered":true,"peers":{
                "1":{"connected":true,"endpoint":"203.0.113.7:51820"},
                "2":{"connected":false,"isRelay":true}}}"#,
        )
        .unwrap();
        assert_eq!(status.connected_peers(), 1);
    }

    #[test]
    fn test_rejects_non_http_endpoint() {
        let result = HttpStatusSource::new(
            "ftp://127.0.0.1/status".to_string(),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(StatusError::InvalidUrl(_))));
    }
}
