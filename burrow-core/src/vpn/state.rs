//! Tunnel status types
//!
//! Defines the user-facing tunnel status and the inputs the state machine
//! derives it from.

use serde::{Deserialize, Serialize};

/// User-facing tunnel status
///
/// Exactly one value is current at any time. Only the state machine writes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    /// No tunnel
    #[default]
    Disconnected,

    /// Connect requested, OS has not reported progress yet
    Starting,

    /// Interface is up, waiting for the engine to register
    Registering,

    /// Engine registered and connected
    Connected,

    /// Path changed, the engine is rebinding its socket
    Reconnecting,

    /// Disconnect requested
    Disconnecting,

    /// Connect attempt failed at the OS level
    Error,
}

impl TunnelStatus {
    /// Whether the status represents an active or pending tunnel
    pub fn is_active(&self) -> bool {
        !matches!(self, TunnelStatus::Disconnected | TunnelStatus::Error)
    }
}

impl std::fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TunnelStatus::Disconnected => "disconnected",
            TunnelStatus::Starting => "starting",
            TunnelStatus::Registering => "registering",
            TunnelStatus::Connected => "connected",
            TunnelStatus::Reconnecting => "reconnecting",
            TunnelStatus::Disconnecting => "disconnecting",
            TunnelStatus::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Coarse lifecycle events reported by the OS tunnel framework
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsTunnelEvent {
    Disconnected,
    Connecting,
    Connected,
    Reasserting,
    Disconnecting,
    /// A value the client does not recognise
    Unknown(String),
}

impl std::fmt::Display for OsTunnelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsTunnelEvent::Disconnected => write!(f, "disconnected"),
            OsTunnelEvent::Connecting => write!(f, "connecting"),
            OsTunnelEvent::Connected => write!(f, "connected"),
            OsTunnelEvent::Reasserting => write!(f, "reasserting"),
            OsTunnelEvent::Disconnecting => write!(f, "disconnecting"),
            OsTunnelEvent::Unknown(value) => write!(f, "unknown({})", value),
        }
    }
}

/// Error carried by a connection snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotError {
    pub code: String,
    pub message: String,
}

/// Point-in-time view of the engine's connection state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub connected: bool,
    /// `None` when the engine has not reported registration yet
    pub registered: Option<bool>,
    pub terminated: bool,
    pub error: Option<SnapshotError>,
}

impl ConnectionSnapshot {
    /// Connected and registered
    pub fn is_established(&self) -> bool {
        self.connected && self.registered == Some(true)
    }

    /// An error reported before the engine ever registered
    pub fn is_fatal_pre_registration(&self) -> bool {
        self.error.is_some() && self.registered != Some(true)
    }
}
