//! Unit tests for error types and conversions

use burrow_core::engine::interpret_reply;
use burrow_core::error::{BurrowError, ConfigError, EngineError, SettingsError, TunnelError};

#[test]
fn test_engine_error_display() {
    let error = EngineError::Rejected {
        message: "Tunnel already running".to_string(),
    };
    assert_eq!(
        error.to_string(),
        "Engine rejected the request: Tunnel already running"
    );
}

#[test]
fn test_tunnel_error_display() {
    let error = TunnelError::CommandFailed {
        command: "ip link set up".to_string(),
        reason: "Operation not permitted".to_string(),
    };
    assert_eq!(
        error.to_string(),
        "Command `ip link set up` failed: Operation not permitted"
    );
}

#[test]
fn test_settings_error_wraps_tunnel_error() {
    let error: SettingsError = TunnelError::NotRunning.into();
    assert_eq!(
        error.to_string(),
        "Host rejected network settings: Tunnel is not running"
    );
}

#[test]
fn test_burrow_error_from_components() {
    let config: BurrowError = ConfigError::MissingField {
        field: "BURROW_SECRET".to_string(),
    }
    .into();
    assert!(matches!(config, BurrowError::Config(_)));

    let engine: BurrowError = EngineError::NotInitialized.into();
    assert!(matches!(engine, BurrowError::Engine(_)));

    let tunnel: BurrowError = TunnelError::NotRunning.into();
    assert!(matches!(tunnel, BurrowError::Tunnel(_)));
}

#[test]
fn test_engine_reply_classification() {
    assert_eq!(interpret_reply("Tunnel started"), Ok("Tunnel started"));
    assert_eq!(
        interpret_reply("Error: Tunnel already running"),
        Err(EngineError::Rejected {
            message: "Tunnel already running".to_string()
        })
    );
}
