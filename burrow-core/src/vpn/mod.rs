//! Tunnel session module
//!
//! Connection state reconciliation, engine status polling, network settings
//! reconciliation and network path monitoring.

pub mod network_monitor;
pub mod network_settings;
pub mod policy;
pub mod session;
pub mod settings_reconciler;
pub mod state;
pub mod state_machine;
pub mod status_poller;

// Public re-exports
pub use network_monitor::{
    InterfaceType, NetworkManagerPathSource, NetworkTransitionWatcher, PathEvent, PathSource,
    RebindRequested,
};
pub use network_settings::{AppliedConfig, NetworkConfigSnapshot};
pub use policy::PollingPolicy;
pub use session::{SessionParts, TunnelSession};
pub use settings_reconciler::{ReconcileOutcome, SettingsReconciler};
pub use state::{ConnectionSnapshot, OsTunnelEvent, TunnelStatus};
pub use state_machine::{
    ConnectionStateMachine, LifecycleReporter, MachineConfig, MachineEvent, StateMachineHandle,
    TeardownReason, UserAlert,
};
pub use status_poller::StatusPoller;
