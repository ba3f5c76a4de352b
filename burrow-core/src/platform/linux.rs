//! Linux tunnel host
//!
//! Creates a kernel TUN interface and configures it with `ip` and
//! `resolvectl`.

use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::platform::TunnelHost;
use crate::vpn::network_settings::{AppliedConfig, DnsSettings, Ipv4Settings, Ipv6Settings};
use crate::vpn::state::OsTunnelEvent;
use crate::vpn::state_machine::LifecycleReporter;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tun::{Configuration, Device, Layer};

/// Route used to reach the network outside the tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
struct UnderlyingGateway {
    via: String,
    device: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    V4,
    V6,
}

impl Family {
    fn flag(self) -> &'static str {
        match self {
            Family::V4 => "-4",
            Family::V6 => "-6",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Family::V4 => "IPv4",
            Family::V6 => "IPv6",
        }
    }
}

/// Excluded route installed through the underlying gateway
struct BypassRoute {
    family: Family,
    destination: String,
}

#[derive(Default)]
struct HostState {
    device: Option<tun::platform::Device>,
    name: Option<String>,
    bypass_routes: Vec<BypassRoute>,
    dns_configured: bool,
}

/// Tunnel host backed by the kernel TUN driver
pub struct LinuxTunnelHost {
    requested_name: Option<String>,
    mtu: u32,
    reporter: LifecycleReporter,
    ip: PathBuf,
    resolvectl: Option<PathBuf>,
    state: Mutex<HostState>,
}

impl LinuxTunnelHost {
    /// Locate the required tools
    ///
    /// `ip` is required; without `resolvectl` DNS settings are skipped.
    pub fn new(config: &TunnelConfig, reporter: LifecycleReporter) -> Result<Self, TunnelError> {
        let ip = which::which("ip").map_err(|e| TunnelError::InstallFailed {
            reason: format!("`ip` not found in PATH: {}", e),
        })?;
        let resolvectl = which::which("resolvectl").ok();
        if resolvectl.is_none() {
            warn!("`resolvectl` not found; tunnel DNS settings will not be applied");
        }

        Ok(Self {
            requested_name: config.interface_name.clone(),
            mtu: config.mtu,
            reporter,
            ip,
            resolvectl,
            state: Mutex::new(HostState::default()),
        })
    }

    async fn run_command(&self, program: &Path, args: &[&str]) -> Result<String, TunnelError> {
        debug!(cmd = %program.display(), ?args, "Running network command");
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| TunnelError::CommandFailed {
                command: format!("{} {}", program.display(), args.join(" ")),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(TunnelError::CommandFailed {
                command: format!("{} {}", program.display(), args.join(" ")),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn ip(&self, args: &[&str]) -> Result<String, TunnelError> {
        self.run_command(&self.ip, args).await
    }

    /// Route excluded destinations around the tunnel
    ///
    /// Fails when the host has no default route of that family outside the
    /// tunnel, so the configuration is not recorded as applied.
    async fn install_bypass_routes(
        &self,
        name: &str,
        family: Family,
        destinations: &[String],
        state: &mut HostState,
    ) -> Result<(), TunnelError> {
        if destinations.is_empty() {
            return Ok(());
        }

        let routes = self.ip(&[family.flag(), "route", "show", "default"]).await?;
        let gateway = bypass_gateway(&routes, name, family, destinations.len())?;

        for destination in destinations {
            self.ip(&[
                family.flag(),
                "route",
                "replace",
                destination,
                "via",
                &gateway.via,
                "dev",
                &gateway.device,
            ])
            .await?;
            state.bypass_routes.push(BypassRoute {
                family,
                destination: destination.clone(),
            });
        }
        debug!(
            family = family.label(),
            count = destinations.len(),
            via = %gateway.via,
            "Installed bypass routes"
        );
        Ok(())
    }

    async fn apply_ipv4(
        &self,
        name: &str,
        ipv4: &Ipv4Settings,
        state: &mut HostState,
    ) -> Result<(), TunnelError> {
        self.ip(&["-4", "addr", "flush", "dev", name]).await?;
        for (index, address) in ipv4.addresses.iter().enumerate() {
            let prefix = match ipv4.subnet_masks.get(index) {
                Some(mask) => mask_to_prefix(mask)?,
                None => 32,
            };
            let cidr = format!("{}/{}", address, prefix);
            self.ip(&["-4", "addr", "replace", &cidr, "dev", name]).await?;
        }

        for route in &ipv4.included_routes {
            let destination = if route.is_default {
                "default".to_string()
            } else {
                let prefix = match &route.subnet_mask {
                    Some(mask) => mask_to_prefix(mask)?,
                    None => 32,
                };
                format!("{}/{}", route.destination_address, prefix)
            };
            self.ip(&["-4", "route", "replace", &destination, "dev", name])
                .await?;
        }

        let mut excluded = Vec::with_capacity(ipv4.excluded_routes.len());
        for route in &ipv4.excluded_routes {
            let prefix = match &route.subnet_mask {
                Some(mask) => mask_to_prefix(mask)?,
                None => 32,
            };
            excluded.push(format!("{}/{}", route.destination_address, prefix));
        }
        self.install_bypass_routes(name, Family::V4, &excluded, state)
            .await
    }

    async fn apply_ipv6(
        &self,
        name: &str,
        ipv6: &Ipv6Settings,
        state: &mut HostState,
    ) -> Result<(), TunnelError> {
        self.ip(&["-6", "addr", "flush", "dev", name]).await?;
        for (index, address) in ipv6.addresses.iter().enumerate() {
            let prefix = ipv6
                .network_prefixes
                .get(index)
                .map(String::as_str)
                .unwrap_or("128");
            let cidr = format!("{}/{}", address, prefix);
            self.ip(&["-6", "addr", "replace", &cidr, "dev", name]).await?;
        }

        for route in &ipv6.included_routes {
            let destination = if route.is_default {
                "default".to_string()
            } else {
                format!(
                    "{}/{}",
                    route.destination_address,
                    route.network_prefix_length.unwrap_or(128)
                )
            };
            self.ip(&["-6", "route", "replace", &destination, "dev", name])
                .await?;
        }

        let excluded: Vec<String> = ipv6
            .excluded_routes
            .iter()
            .map(|route| {
                format!(
                    "{}/{}",
                    route.destination_address,
                    route.network_prefix_length.unwrap_or(128)
                )
            })
            .collect();
        self.install_bypass_routes(name, Family::V6, &excluded, state)
            .await
    }

    async fn apply_dns(
        &self,
        name: &str,
        dns: &DnsSettings,
        state: &mut HostState,
    ) -> Result<(), TunnelError> {
        let Some(resolvectl) = &self.resolvectl else {
            return Ok(());
        };

        let mut args = vec!["dns", name];
        args.extend(dns.servers.iter().map(String::as_str));
        self.run_command(resolvectl, &args).await?;

        if dns.matches_all_domains() {
            self.run_command(resolvectl, &["domain", name, "~."]).await?;
            self.run_command(resolvectl, &["default-route", name, "true"])
                .await?;
        }
        state.dns_configured = true;
        Ok(())
    }

    async fn remove_bypass_routes(&self, state: &mut HostState) {
        for route in state.bypass_routes.drain(..) {
            if let Err(e) = self
                .ip(&[route.family.flag(), "route", "del", &route.destination])
                .await
            {
                debug!(
                    destination = %route.destination,
                    error = %e,
                    "Failed to remove bypass route"
                );
            }
        }
    }
}

#[async_trait]
impl TunnelHost for LinuxTunnelHost {
    #[tracing::instrument(skip(self), fields(mtu = self.mtu))]
    async fn open_tunnel(&self) -> Result<RawFd, TunnelError> {
        self.reporter.report(OsTunnelEvent::Connecting);

        let mut tun_config = Configuration::default();
        tun_config.layer(Layer::L3);
        tun_config.mtu(self.mtu as i32);
        tun_config.platform(|platform| {
            platform.packet_information(false);
        });
        if let Some(name) = &self.requested_name {
            tun_config.name(name);
        }

        let device = tun::create(&tun_config).map_err(|e| TunnelError::Device {
            reason: format!("failed to create TUN device: {}", e),
        })?;
        let name = device.name().to_string();
        let fd = device.as_raw_fd();
        info!(interface = %name, fd, "Created TUN device");

        let mut state = self.state.lock().await;
        state.name = Some(name);
        state.device = Some(device);
        Ok(fd)
    }

    async fn complete_start(&self) -> Result<(), TunnelError> {
        let name = self
            .state
            .lock()
            .await
            .name
            .clone()
            .ok_or(TunnelError::NotRunning)?;

        self.ip(&["link", "set", "dev", &name, "up"])
            .await
            .map_err(|e| TunnelError::StartFailed {
                reason: e.to_string(),
            })?;
        self.reporter.report(OsTunnelEvent::Connected);
        Ok(())
    }

    async fn apply_network_settings(&self, config: &AppliedConfig) -> Result<(), TunnelError> {
        let mut state = self.state.lock().await;
        let name = state.name.clone().ok_or(TunnelError::NotRunning)?;

        let result = async {
            self.remove_bypass_routes(&mut state).await;
            if let Some(mtu) = config.mtu {
                self.ip(&["link", "set", "dev", &name, "mtu", &mtu.to_string()])
                    .await?;
            }
            if let Some(ipv4) = &config.ipv4 {
                self.apply_ipv4(&name, ipv4, &mut state).await?;
            }
            if let Some(ipv6) = &config.ipv6 {
                self.apply_ipv6(&name, ipv6, &mut state).await?;
            }
            if let Some(dns) = &config.dns {
                self.apply_dns(&name, dns, &mut state).await?;
            }
            Ok::<(), TunnelError>(())
        }
        .await;

        result.map_err(|e| TunnelError::ApplyFailed {
            reason: e.to_string(),
        })
    }

    async fn cancel_tunnel(&self, reason: &str) {
        info!(%reason, "Cancelling tunnel");
        self.reporter.report(OsTunnelEvent::Disconnecting);

        let mut state = self.state.lock().await;
        self.remove_bypass_routes(&mut state).await;

        if state.dns_configured {
            if let (Some(resolvectl), Some(name)) = (&self.resolvectl, &state.name) {
                if let Err(e) = self.run_command(resolvectl, &["revert", name]).await {
                    debug!(error = %e, "Failed to revert tunnel DNS");
                }
            }
            state.dns_configured = false;
        }

        // Closing the last descriptor removes a non-persistent TUN interface
        state.device = None;
        state.name = None;
        drop(state);

        self.reporter.report(OsTunnelEvent::Disconnected);
    }
}

/// Convert a dotted subnet mask to a prefix length
fn mask_to_prefix(mask: &str) -> Result<u8, TunnelError> {
    let bits = u32::from(mask.parse::<Ipv4Addr>().map_err(|e| TunnelError::ApplyFailed {
        reason: format!("invalid subnet mask {}: {}", mask, e),
    })?);

    if bits.leading_ones() + bits.trailing_zeros() != 32 {
        return Err(TunnelError::ApplyFailed {
            reason: format!("non-contiguous subnet mask {}", mask),
        });
    }
    Ok(bits.leading_ones() as u8)
}

/// Gateway for excluded routes, or an apply failure when there is none
fn bypass_gateway(
    routes: &str,
    tunnel: &str,
    family: Family,
    excluded: usize,
) -> Result<UnderlyingGateway, TunnelError> {
    parse_default_route(routes, tunnel).ok_or_else(|| TunnelError::ApplyFailed {
        reason: format!(
            "no {} default route outside the tunnel for {} excluded routes",
            family.label(),
            excluded
        ),
    })
}

/// Parse the first `default via <gw> dev <dev>` line from `ip route show default`
/// that does not go through `tunnel`
fn parse_default_route(output: &str, tunnel: &str) -> Option<UnderlyingGateway> {
    output.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        if words.next()? != "default" {
            return None;
        }
        let mut via = None;
        let mut device = None;
        while let Some(word) = words.next() {
            match word {
                "via" => via = words.next().map(str::to_string),
                "dev" => device = words.next().map(str::to_string),
                _ => {}
            }
        }
        let device = device.filter(|device| device != tunnel)?;
        Some(UnderlyingGateway { via: via?, device })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_to_prefix() {
        assert_eq!(mask_to_prefix("255.255.255.0").unwrap(), 24);
        assert_eq!(mask_to_prefix("255.255.0.0").unwrap(), 16);
        assert_eq!(mask_to_prefix("255.255.255.255").unwrap(), 32);
        assert_eq!(mask_to_prefix("0.0.0.0").unwrap(), 0);
        assert!(mask_to_prefix("255.0.255.0").is_err());
        assert!(mask_to_prefix("not-a-mask").is_err());
    }

    #[test]
    fn test_parse_default_route() {
        let output = "default via 192.168.1.1 dev wlp3s0 proto dhcp metric 600\n";
        assert_eq!(
            parse_default_route(output, "tun0"),
            Some(UnderlyingGateway {
                via: "192.168.1.1".to_string(),
                device: "wlp3s0".to_string(),
            })
        );
        assert_eq!(parse_default_route("", "tun0"), None);
        assert_eq!(parse_default_route("default dev wg0 scope link", "tun0"), None);
    }

    #[test]
    fn test_parse_ipv6_default_route_skips_tunnel() {
        let output = "default via fd00::1 dev tun0 metric 50\n\
                      default via fe80::1 dev enp0s31f6 proto ra metric 100 pref medium\n";
        assert_eq!(
            parse_default_route(output, "tun0"),
            Some(UnderlyingGateway {
                via: "fe80::1".to_string(),
                device: "enp0s31f6".to_string(),
            })
        );
        assert_eq!(
            parse_default_route("default via fd00::1 dev tun0 metric 50\n", "tun0"),
            None
        );
    }

    #[test]
    fn test_excluded_routes_without_outside_gateway_are_rejected() {
        let only_tunnel = "default via fd00::1 dev tun0 metric 50\n";
        match bypass_gateway(only_tunnel, "tun0", Family::V6, 2) {
            Err(TunnelError::ApplyFailed { reason }) => {
                assert!(reason.contains("IPv6"), "{}", reason);
                assert!(reason.contains("2 excluded routes"), "{}", reason);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let gateway = bypass_gateway(
            "default via 10.0.0.1 dev eth0\n",
            "tun0",
            Family::V4,
            1,
        )
        .unwrap();
        assert_eq!(gateway.device, "eth0");
    }
}
