//! Configuration module
//!
//! Handles loading and saving tunnel configuration from TOML files.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

pub mod toml_config;

/// How the host prerequisites for the tunnel are provisioned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallMode {
    /// Require the kernel TUN device node to be present
    #[default]
    DeviceNode,
    /// Require a persisted VPN profile, writing it on first use
    Profile,
}

/// Tunnel configuration structure
///
/// Contains all non-sensitive parameters handed to the engine when the
/// tunnel starts. The client secret and user token come from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Control plane endpoint (http:// or https://)
    pub endpoint: String,

    /// Olm client identifier
    pub id: String,

    /// Organization to join
    #[serde(default)]
    pub org_id: Option<String>,

    /// Tunnel MTU handed to the engine
    #[serde(default = "default_mtu")]
    pub mtu: u32,

    /// DNS server the engine advertises inside the tunnel
    #[serde(default = "default_dns")]
    pub dns: String,

    /// Attempt direct peer connections before relaying
    #[serde(default)]
    pub holepunch: bool,

    /// Interval between engine keepalive pings
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u32,

    /// Time without a pong before a peer is considered lost
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u32,

    /// Upstream resolvers used by the engine's DNS proxy
    #[serde(default)]
    pub upstream_dns: Vec<String>,

    /// Route all DNS queries through the tunnel resolver
    #[serde(default)]
    pub override_dns: bool,

    /// Send DNS traffic through the tunnel itself
    #[serde(default)]
    pub tunnel_dns: bool,

    /// Requested TUN interface name (kernel picks one if absent)
    #[serde(default)]
    pub interface_name: Option<String>,

    /// Host provisioning strategy
    #[serde(default)]
    pub install_mode: InstallMode,
}

fn default_mtu() -> u32 {
    1280
}
fn default_dns() -> String {
    "8.8.8.8".to_string()
}
fn default_ping_interval() -> u32 {
    3
}
fn default_ping_timeout() -> u32 {
    5
}

impl TunnelConfig {
    /// Create a new tunnel configuration with defaults for everything optional
    pub fn new(endpoint: String, id: String) -> Self {
        Self {
            endpoint,
            id,
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.is_empty() {
            return Err("Endpoint cannot be empty".to_string());
        }

        match url::Url::parse(&self.endpoint) {
            Ok(url) => match url.scheme() {
                "http" | "https" => {}
                scheme => {
                    return Err(format!(
                        "Endpoint scheme must be http or https, got: {}",
                        scheme
                    ))
                }
            },
            Err(e) => return Err(format!("Endpoint is not a valid URL: {}", e)),
        }

        if self.id.is_empty() {
            return Err("Client id cannot be empty".to_string());
        }

        if !(576..=9000).contains(&self.mtu) {
            return Err(format!("MTU must be between 576 and 9000, got: {}", self.mtu));
        }

        if self.dns.parse::<IpAddr>().is_err() {
            return Err(format!("DNS server is not an IP address: {}", self.dns));
        }

        if self.ping_interval_secs == 0 || self.ping_timeout_secs == 0 {
            return Err("Ping interval and timeout must be non-zero".to_string());
        }

        for upstream in &self.upstream_dns {
            if upstream.parse::<SocketAddr>().is_err() && upstream.parse::<IpAddr>().is_err() {
                return Err(format!("Invalid upstream DNS server: {}", upstream));
            }
        }

        if let Some(name) = &self.interface_name {
            // IFNAMSIZ is 16 including the terminating NUL
            if name.is_empty() || name.len() > 15 {
                return Err(format!("Invalid interface name: {:?}", name));
            }
        }

        Ok(())
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            id: String::new(),
            org_id: None,
            mtu: default_mtu(),
            dns: default_dns(),
            holepunch: false,
            ping_interval_secs: default_ping_interval(),
            ping_timeout_secs: default_ping_timeout(),
            upstream_dns: Vec::new(),
            override_dns: false,
            tunnel_dns: false,
            interface_name: None,
            install_mode: InstallMode::default(),
        }
    }
}
