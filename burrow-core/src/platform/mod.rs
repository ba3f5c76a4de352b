//! Host tunnel framework
//!
//! The host owns the TUN interface: it creates it, reports its coarse
//! lifecycle to the state machine, applies network settings, and tears it
//! down again.

use crate::error::TunnelError;
use crate::vpn::network_settings::AppliedConfig;
use async_trait::async_trait;
use std::os::fd::RawFd;

pub mod installer;
#[cfg(target_os = "linux")]
pub mod linux;

pub use installer::{installer_for, DeviceNodeInstaller, ProfileInstaller, TunnelInstaller};
#[cfg(target_os = "linux")]
pub use linux::LinuxTunnelHost;

/// Operations the session needs from the OS tunnel framework
///
/// Implementations report `connecting`, `connected`, `disconnecting` and
/// `disconnected` through the `LifecycleReporter` they were built with.
#[async_trait]
pub trait TunnelHost: Send + Sync {
    /// Create the tunnel interface and return its packet descriptor
    async fn open_tunnel(&self) -> Result<RawFd, TunnelError>;

    /// Mark the interface as up once the engine has taken the descriptor
    async fn complete_start(&self) -> Result<(), TunnelError>;

    /// Push a complete configuration to the interface
    async fn apply_network_settings(&self, config: &AppliedConfig) -> Result<(), TunnelError>;

    /// Tear the interface down
    async fn cancel_tunnel(&self, reason: &str);
}
