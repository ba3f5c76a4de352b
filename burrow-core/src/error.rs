//! Error types for the burrow VPN client
//!
//! This module defines all error types used throughout the application,
//! providing consistent error handling and user-friendly error messages.

use thiserror::Error;

/// Main error type for the burrow application
#[derive(Error, Debug)]
pub enum BurrowError {
    /// Errors related to configuration loading/parsing
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors reported by the tunnel engine
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Errors raised by the host tunnel framework
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Errors while reconciling network settings
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {path}")]
    LoadFailed { path: String },

    #[error("Failed to save configuration file: {path}")]
    SaveFailed { path: String },

    #[error("Invalid engine endpoint: {endpoint}")]
    InvalidEndpoint { endpoint: String },

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation error: {message}")]
    ValidationError { message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },
}

/// Errors reported across the engine call boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Engine has not been initialized")]
    NotInitialized,

    #[error("Engine rejected the request: {message}")]
    Rejected { message: String },

    #[error("Invalid engine configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Engine unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Errors raised by the host tunnel framework
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TunnelError {
    #[error("Tunnel prerequisites missing: {reason}")]
    InstallFailed { reason: String },

    #[error("Failed to start tunnel: {reason}")]
    StartFailed { reason: String },

    #[error("Failed to apply network settings: {reason}")]
    ApplyFailed { reason: String },

    #[error("TUN device error: {reason}")]
    Device { reason: String },

    #[error("Command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Tunnel is not running")]
    NotRunning,
}

/// Network settings reconciliation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Failed to decode network settings: {reason}")]
    Decode { reason: String },

    #[error("Host rejected network settings: {0}")]
    Apply(#[from] TunnelError),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, BurrowError>;
