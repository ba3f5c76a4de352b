//! TOML configuration file I/O
//!
//! Handles loading and saving tunnel configuration to/from TOML files
//! in the user's configuration directory.

use crate::config::TunnelConfig;
use crate::error::{BurrowError, ConfigError};
use crate::vpn::policy::PollingPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Complete TOML configuration structure
///
/// Contains both tunnel configuration and polling policy settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Tunnel settings handed to the engine
    #[serde(rename = "tunnel")]
    pub tunnel: TunnelConfig,

    /// Polling cadence (optional, defaults apply)
    #[serde(default)]
    pub polling: PollingPolicy,
}

impl TomlConfig {
    /// Create a new TOML configuration
    pub fn new(tunnel: TunnelConfig, polling: PollingPolicy) -> Self {
        Self { tunnel, polling }
    }

    /// Validate both sections
    pub fn validate(&self) -> Result<(), BurrowError> {
        self.tunnel
            .validate()
            .map_err(|message| ConfigError::ValidationError { message })?;

        self.polling.validate().map_err(|e| ConfigError::ValidationError {
            message: format!("Invalid polling policy: {}", e),
        })?;

        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, BurrowError> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BurrowError::Config(ConfigError::LoadFailed {
                path: path.to_string_lossy().to_string(),
            }),
            _ => BurrowError::Config(ConfigError::IoError {
                message: format!("Failed to read config file: {}", e),
            }),
        })?;

        let config: TomlConfig = toml::from_str(&contents).map_err(|e| {
            BurrowError::Config(ConfigError::ValidationError {
                message: format!("Failed to parse config file: {}", e),
            })
        })?;

        config.validate()?;

        debug!(
            status_interval_ms = config.polling.status_interval_ms,
            settings_interval_ms = config.polling.settings_interval_ms,
            rebind_debounce_ms = config.polling.rebind_debounce_ms,
            "Loaded polling policy"
        );

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), BurrowError> {
        self.validate()?;

        let contents = toml::to_string_pretty(self)?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BurrowError::Config(ConfigError::IoError {
                    message: format!("Failed to create config directory: {}", e),
                })
            })?;
        }

        std::fs::write(path, contents).map_err(|_e| {
            BurrowError::Config(ConfigError::SaveFailed {
                path: path.to_string_lossy().to_string(),
            })
        })?;

        info!("Saved tunnel configuration to {:?}", path);
        Ok(())
    }
}

/// Default configuration file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Get the default configuration directory
///
/// Returns ~/.config/burrow, or BURROW_CONFIG_DIR if set.
///
/// Tunnel setup needs CAP_NET_ADMIN, so the binary is frequently run through
/// sudo; in that case the invoking user's home is used.
pub fn get_config_dir() -> Result<PathBuf, BurrowError> {
    if let Ok(config_dir) = std::env::var("BURROW_CONFIG_DIR") {
        return Ok(PathBuf::from(config_dir));
    }

    let home = if let Ok(sudo_user) = std::env::var("SUDO_USER") {
        std::env::var("SUDO_HOME").unwrap_or_else(|_| format!("/home/{}", sudo_user))
    } else {
        std::env::var("HOME").map_err(|_| {
            BurrowError::Config(ConfigError::IoError {
                message: "HOME environment variable not set".to_string(),
            })
        })?
    };

    Ok(PathBuf::from(home).join(".config").join("burrow"))
}

/// Get the default configuration file path
pub fn get_config_path() -> Result<PathBuf, BurrowError> {
    let config_dir = get_config_dir()?;
    Ok(config_dir.join(CONFIG_FILE_NAME))
}

/// Load configuration from the default TOML file
pub fn load_config() -> Result<TomlConfig, BurrowError> {
    let config_path = get_config_path()?;
    TomlConfig::from_file(&config_path)
}

/// Save configuration to the default TOML file
pub fn save_config(config: &TomlConfig) -> Result<(), BurrowError> {
    let config_path = get_config_path()?;
    config.to_file(&config_path)
}

/// Check if a configuration file exists
pub fn config_exists() -> Result<bool, BurrowError> {
    let config_path = get_config_path()?;
    Ok(config_path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> TomlConfig {
        let mut tunnel = TunnelConfig::new(
            "https://pangolin.example.com".to_string(),
            "olm-abc".to_string(),
        );
        tunnel.override_dns = true;
        tunnel.upstream_dns = vec!["1.1.1.1:53".to_string()];
        TomlConfig::new(tunnel, PollingPolicy::default())
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let original = sample();
        original.to_file(&config_path).unwrap();

        let loaded = TomlConfig::from_file(&config_path).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_polling_section_is_optional() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            "[tunnel]\nendpoint = \"https://pangolin.example.com\"\nid = \"olm-abc\"\n",
        )
        .unwrap();

        let loaded = TomlConfig::from_file(&config_path).unwrap();
        assert_eq!(loaded.polling, PollingPolicy::default());
        assert_eq!(loaded.tunnel.mtu, 1280);
    }

    #[test]
    fn test_missing_file_is_load_failed() {
        let temp_dir = tempdir().unwrap();
        let err = TomlConfig::from_file(&temp_dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(
            err,
            BurrowError::Config(ConfigError::LoadFailed { .. })
        ));
    }

    #[test]
    fn test_invalid_config_is_not_saved() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = sample();
        config.tunnel.endpoint.clear();

        assert!(config.to_file(&config_path).is_err());
        assert!(!config_path.exists());
    }
}
