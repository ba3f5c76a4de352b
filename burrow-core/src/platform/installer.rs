//! Tunnel prerequisites
//!
//! Before the first connect the host must be able to create a tunnel. Two
//! strategies exist, selected by `InstallMode`.

use crate::config::toml_config::TomlConfig;
use crate::config::InstallMode;
use crate::error::TunnelError;
use async_trait::async_trait;
use std::os::unix::fs::FileTypeExt;
use std::path::PathBuf;
use tracing::{info, warn};

/// Kernel TUN clone device
const TUN_DEVICE_PATH: &str = "/dev/net/tun";

/// Ensures the host can create tunnels
#[async_trait]
pub trait TunnelInstaller: Send + Sync {
    fn name(&self) -> &'static str;

    async fn ensure_installed(&self) -> Result<(), TunnelError>;
}

/// Requires the kernel TUN device node
#[derive(Debug, Clone)]
pub struct DeviceNodeInstaller {
    device_path: PathBuf,
}

impl DeviceNodeInstaller {
    pub fn new() -> Self {
        Self::with_path(PathBuf::from(TUN_DEVICE_PATH))
    }

    pub fn with_path(device_path: PathBuf) -> Self {
        Self { device_path }
    }
}

impl Default for DeviceNodeInstaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TunnelInstaller for DeviceNodeInstaller {
    fn name(&self) -> &'static str {
        "device-node"
    }

    #[tracing::instrument(skip(self), fields(path = %self.device_path.display()))]
    async fn ensure_installed(&self) -> Result<(), TunnelError> {
        let metadata = tokio::fs::metadata(&self.device_path)
            .await
            .map_err(|e| TunnelError::InstallFailed {
                reason: format!("{}: {}", self.device_path.display(), e),
            })?;

        if !metadata.file_type().is_char_device() {
            return Err(TunnelError::InstallFailed {
                reason: format!("{} is not a character device", self.device_path.display()),
            });
        }

        if !nix::unistd::geteuid().is_root() {
            // CAP_NET_ADMIN may still have been granted to the binary
            warn!("Not running as root; tunnel creation requires CAP_NET_ADMIN");
        }

        Ok(())
    }
}

/// Requires a persisted tunnel profile, writing it on first use
#[derive(Debug, Clone)]
pub struct ProfileInstaller {
    profile_path: PathBuf,
    profile: TomlConfig,
}

impl ProfileInstaller {
    pub fn new(profile_path: PathBuf, profile: TomlConfig) -> Self {
        Self {
            profile_path,
            profile,
        }
    }
}

#[async_trait]
impl TunnelInstaller for ProfileInstaller {
    fn name(&self) -> &'static str {
        "profile"
    }

    #[tracing::instrument(skip(self), fields(path = %self.profile_path.display()))]
    async fn ensure_installed(&self) -> Result<(), TunnelError> {
        if self.profile_path.exists() {
            return Ok(());
        }

        self.profile
            .to_file(&self.profile_path)
            .map_err(|e| TunnelError::InstallFailed {
                reason: e.to_string(),
            })?;
        info!("Installed tunnel profile");
        Ok(())
    }
}

/// Pick the installer for the configured mode
pub fn installer_for(
    mode: InstallMode,
    profile_path: PathBuf,
    profile: &TomlConfig,
) -> Box<dyn TunnelInstaller> {
    match mode {
        InstallMode::DeviceNode => Box::new(DeviceNodeInstaller::new()),
        InstallMode::Profile => Box::new(ProfileInstaller::new(profile_path, profile.clone())),
    }
}
