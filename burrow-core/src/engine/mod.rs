//! Tunnel engine call boundary
//!
//! The engine owns the encrypted data plane. It is reachable only through a
//! narrow string/integer call surface plus a locally polled status channel.

use crate::config::TunnelConfig;
use crate::error::EngineError;
use crate::types::{Credentials, PowerMode};
use serde::Serialize;
use std::collections::BTreeMap;

#[cfg(feature = "olm-ffi")]
pub mod ffi;
pub mod log;
pub mod status;

pub use status::{EngineFault, EngineStatus, HttpStatusSource, StatusError, StatusSource};

/// Prefix the engine uses for failed result messages
const ERROR_PREFIX: &str = "Error:";

/// The engine's call surface
///
/// Every call returns the engine's raw result message; use [`interpret_reply`]
/// to turn it into a `Result`. Calls are short and non-blocking on the engine
/// side, so they are invoked directly from async tasks.
pub trait TunnelEngine: Send + Sync {
    /// Start the data plane on the given TUN file descriptor
    fn start_tunnel(&self, fd: i32, config_json: &str) -> String;

    /// Stop the data plane
    fn stop_tunnel(&self) -> String;

    /// Current network settings version (0 while the tunnel is not running)
    fn network_settings_version(&self) -> i64;

    /// Current network settings as JSON (`{}` when nothing is known yet)
    fn network_settings(&self) -> String;

    /// Switch between low and normal power operation
    fn set_power_mode(&self, mode: PowerMode) -> String;

    /// Recreate the outbound socket after a network path change
    fn rebind_socket(&self) -> String;
}

/// Classify an engine result message
pub fn interpret_reply(reply: &str) -> Result<&str, EngineError> {
    let trimmed = reply.trim();
    match trimmed.strip_prefix(ERROR_PREFIX) {
        Some(message) => Err(EngineError::Rejected {
            message: message.trim().to_string(),
        }),
        None => Ok(trimmed),
    }
}

/// Engine initialisation parameters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    /// Expose the local status API
    #[serde(rename = "enableAPI")]
    pub enable_api: bool,
    /// Unix socket for the local API (empty to use HTTP)
    pub socket_path: String,
    pub log_level: String,
    pub version: String,
    pub agent: String,
}

impl InitRequest {
    /// Parameters for this client build
    pub fn for_client(log_level: &str) -> Self {
        Self {
            enable_api: true,
            socket_path: String::new(),
            log_level: log_level.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            agent: "burrow".to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string(self).map_err(|e| EngineError::InvalidConfig {
            reason: e.to_string(),
        })
    }
}

/// JSON document handed to `startTunnel`
///
/// Borrows the client secret; intentionally has no `Debug` impl.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTunnelRequest<'a> {
    pub endpoint: &'a str,
    pub id: &'a str,
    pub secret: &'a str,
    pub mtu: u32,
    pub dns: &'a str,
    pub holepunch: bool,
    pub ping_interval_seconds: u32,
    pub ping_timeout_seconds: u32,
    #[serde(skip_serializing_if = "is_blank")]
    pub user_token: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    pub org_id: &'a str,
    #[serde(rename = "upstreamDNS")]
    pub upstream_dns: &'a [String],
    #[serde(rename = "overrideDNS")]
    pub override_dns: bool,
    #[serde(rename = "tunnelDNS")]
    pub tunnel_dns: bool,
    /// Device fingerprint collected by an external component
    pub fingerprint: &'a BTreeMap<String, serde_json::Value>,
    /// Posture checks collected by an external component
    pub postures: &'a BTreeMap<String, serde_json::Value>,
}

impl<'a> StartTunnelRequest<'a> {
    pub fn new(
        config: &'a TunnelConfig,
        credentials: &'a Credentials,
        fingerprint: &'a BTreeMap<String, serde_json::Value>,
        postures: &'a BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            endpoint: &config.endpoint,
            id: &config.id,
            secret: credentials.secret.expose(),
            mtu: config.mtu,
            dns: &config.dns,
            holepunch: config.holepunch,
            ping_interval_seconds: config.ping_interval_secs,
            ping_timeout_seconds: config.ping_timeout_secs,
            user_token: credentials
                .user_token
                .as_ref()
                .map(|t| t.expose())
                .unwrap_or_default(),
            org_id: config.org_id.as_deref().unwrap_or_default(),
            upstream_dns: &config.upstream_dns,
            override_dns: config.override_dns,
            tunnel_dns: config.tunnel_dns,
            fingerprint,
            postures,
        }
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string(self).map_err(|e| EngineError::InvalidConfig {
            reason: e.to_string(),
        })
    }
}

fn is_blank(value: &&str) -> bool {
    value.is_empty()
}
