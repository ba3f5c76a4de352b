//! Network settings snapshots and merging
//!
//! The engine publishes partial interface configuration. Fields it omits mean
//! "keep what is already applied", so each snapshot is merged onto the last
//! configuration the host accepted.

use crate::error::SettingsError;
use serde::{Deserialize, Serialize};

/// Remote address used when neither the snapshot nor a prior apply supplied one
pub const DEFAULT_REMOTE_ADDRESS: &str = "127.0.0.1";

/// Match domain meaning "every domain"
const MATCH_ALL_DOMAINS: &str = "";

/// IPv4 route as published by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Route {
    pub destination_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_mask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_address: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// IPv6 route as published by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6Route {
    pub destination_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_prefix_length: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_address: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// Partial interface configuration published by the engine
///
/// Every field is optional; an absent field leaves that aspect unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfigSnapshot {
    pub tunnel_remote_address: Option<String>,
    pub mtu: Option<u32>,
    pub dns_servers: Vec<String>,
    pub ipv4_addresses: Vec<String>,
    pub ipv4_subnet_masks: Vec<String>,
    pub ipv4_included_routes: Vec<Ipv4Route>,
    pub ipv4_excluded_routes: Vec<Ipv4Route>,
    pub ipv6_addresses: Vec<String>,
    pub ipv6_network_prefixes: Vec<String>,
    pub ipv6_included_routes: Vec<Ipv6Route>,
    pub ipv6_excluded_routes: Vec<Ipv6Route>,
}

impl NetworkConfigSnapshot {
    /// Decode the engine's settings document
    ///
    /// `{}` (and an empty reply) decode to an empty snapshot.
    pub fn decode(raw: &str) -> Result<Self, SettingsError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(|e| SettingsError::Decode {
            reason: e.to_string(),
        })
    }

    /// True when the snapshot carries nothing worth applying
    pub fn is_empty(&self) -> bool {
        self.remote_address().is_none()
            && self.mtu.is_none()
            && self.dns_servers.is_empty()
            && self.ipv4_addresses.is_empty()
            && self.ipv6_addresses.is_empty()
    }

    fn remote_address(&self) -> Option<&str> {
        self.tunnel_remote_address
            .as_deref()
            .filter(|address| !address.is_empty())
    }
}

/// Resolver configuration for the tunnel interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsSettings {
    pub servers: Vec<String>,
    /// `[""]` routes every query through the tunnel resolver
    pub match_domains: Vec<String>,
}

impl DnsSettings {
    /// Whether every domain is resolved through the tunnel
    pub fn matches_all_domains(&self) -> bool {
        self.match_domains.iter().any(|d| d == MATCH_ALL_DOMAINS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ipv4Settings {
    pub addresses: Vec<String>,
    pub subnet_masks: Vec<String>,
    pub included_routes: Vec<Ipv4Route>,
    pub excluded_routes: Vec<Ipv4Route>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ipv6Settings {
    pub addresses: Vec<String>,
    pub network_prefixes: Vec<String>,
    pub included_routes: Vec<Ipv6Route>,
    pub excluded_routes: Vec<Ipv6Route>,
}

/// Complete configuration last accepted by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedConfig {
    pub remote_address: String,
    pub mtu: Option<u32>,
    pub dns: Option<DnsSettings>,
    pub ipv4: Option<Ipv4Settings>,
    pub ipv6: Option<Ipv6Settings>,
}

impl AppliedConfig {
    /// Merge a snapshot onto the previously applied configuration
    ///
    /// Supplied values replace, absent values are carried over. DNS, IPv4 and
    /// IPv6 are replaced as whole blocks. With `override_dns` the resolver
    /// always matches every domain, whether its servers are new or carried over.
    pub fn merge(
        previous: Option<&AppliedConfig>,
        snapshot: &NetworkConfigSnapshot,
        override_dns: bool,
    ) -> AppliedConfig {
        let remote_address = snapshot
            .remote_address()
            .map(str::to_string)
            .or_else(|| previous.map(|p| p.remote_address.clone()))
            .unwrap_or_else(|| DEFAULT_REMOTE_ADDRESS.to_string());

        let mtu = snapshot.mtu.or_else(|| previous.and_then(|p| p.mtu));

        let dns = if snapshot.dns_servers.is_empty() {
            previous.and_then(|p| p.dns.clone())
        } else {
            Some(DnsSettings {
                servers: snapshot.dns_servers.clone(),
                match_domains: Vec::new(),
            })
        }
        .map(|dns| DnsSettings {
            match_domains: if override_dns {
                vec![MATCH_ALL_DOMAINS.to_string()]
            } else {
                Vec::new()
            },
            ..dns
        });

        let ipv4 = if snapshot.ipv4_addresses.is_empty() {
            previous.and_then(|p| p.ipv4.clone())
        } else {
            Some(Ipv4Settings {
                addresses: snapshot.ipv4_addresses.clone(),
                subnet_masks: snapshot.ipv4_subnet_masks.clone(),
                included_routes: snapshot.ipv4_included_routes.clone(),
                excluded_routes: snapshot.ipv4_excluded_routes.clone(),
            })
        };

        let ipv6 = if snapshot.ipv6_addresses.is_empty() {
            previous.and_then(|p| p.ipv6.clone())
        } else {
            Some(Ipv6Settings {
                addresses: snapshot.ipv6_addresses.clone(),
                network_prefixes: snapshot.ipv6_network_prefixes.clone(),
                included_routes: snapshot.ipv6_included_routes.clone(),
                excluded_routes: snapshot.ipv6_excluded_routes.clone(),
            })
        };

        AppliedConfig {
            remote_address,
            mtu,
            dns,
            ipv4,
            ipv6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(json: &str) -> NetworkConfigSnapshot {
        NetworkConfigSnapshot::decode(json).unwrap()
    }

    #[test]
    fn test_empty_object_is_valid() {
        let empty = snapshot("{}");
        assert!(empty.is_empty());
        assert_eq!(empty, NetworkConfigSnapshot::default());
        assert!(snapshot("  ").is_empty());
    }

    #[test]
    fn test_malformed_document_is_decode_error() {
        assert!(matches!(
            NetworkConfigSnapshot::decode("{\"mtu\": \"big\"}"),
            Err(SettingsError::Decode { .. })
        ));
        assert!(NetworkConfigSnapshot::decode("not json").is_err());
    }

    #[test]
    fn test_absent_fields_are_retained() {
        let first = AppliedConfig::merge(
            None,
            &snapshot(r#"{"mtu":1400,"dns_servers":["1.1.1.1"]}"#),
            false,
        );
        assert_eq!(first.remote_address, DEFAULT_REMOTE_ADDRESS);

        let second = AppliedConfig::merge(
            Some(&first),
            &snapshot(r#"{"dns_servers":["8.8.8.8"]}"#),
            false,
        );
        assert_eq!(second.mtu, Some(1400));
        assert_eq!(second.dns.unwrap().servers, vec!["8.8.8.8".to_string()]);
    }

    #[test]
    fn test_blocks_replace_whole() {
        let first = AppliedConfig::merge(
            None,
            &snapshot(
                r#"{"ipv4_addresses":["100.90.1.2"],"ipv4_subnet_masks":["255.255.0.0"],
                    "ipv4_included_routes":[{"destination_address":"100.90.0.0","subnet_mask":"255.255.0.0"}]}"#,
            ),
            false,
        );
        let second = AppliedConfig::merge(
            Some(&first),
            &snapshot(r#"{"ipv4_addresses":["100.90.1.3"],"ipv4_subnet_masks":["255.255.255.0"]}"#),
            false,
        );

        let ipv4 = second.ipv4.unwrap();
        assert_eq!(ipv4.addresses, vec!["100.90.1.3".to_string()]);
        assert!(ipv4.included_routes.is_empty());
    }

    #[test]
    fn test_override_dns_matches_all_domains() {
        let first = AppliedConfig::merge(None, &snapshot(r#"{"dns_servers":["10.0.0.53"]}"#), true);
        assert!(first.dns.as_ref().unwrap().matches_all_domains());

        let carried = AppliedConfig::merge(Some(&first), &snapshot(r#"{"mtu":1300}"#), true);
        assert_eq!(carried.dns.unwrap().match_domains, vec![String::new()]);

        let plain = AppliedConfig::merge(None, &snapshot(r#"{"dns_servers":["10.0.0.53"]}"#), false);
        assert!(plain.dns.unwrap().match_domains.is_empty());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let update = snapshot(
            r#"{"tunnel_remote_address":"203.0.113.10","mtu":1280,"dns_servers":["1.1.1.1"],
                "ipv6_addresses":["fd00::2"],"ipv6_network_prefixes":["64"]}"#,
        );
        let once = AppliedConfig::merge(None, &update, true);
        let twice = AppliedConfig::merge(Some(&once), &update, true);
        assert_eq!(once, twice);
    }
}
