//! Connection state machine
//!
//! A single actor task that owns the user-facing `TunnelStatus`. It consumes
//! OS lifecycle events, engine status snapshots and session commands over
//! channels, decides when status polling and settings reconciliation run,
//! and asks the session to tear down or alert the user.

use crate::engine::{StatusSource, TunnelEngine};
use crate::platform::TunnelHost;
use crate::vpn::settings_reconciler::SettingsReconciler;
use crate::vpn::state::{ConnectionSnapshot, OsTunnelEvent, TunnelStatus};
use crate::vpn::status_poller::{PolledSnapshot, StatusPoller};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Reports OS lifecycle events to the state machine
#[derive(Debug, Clone)]
pub struct LifecycleReporter {
    tx: mpsc::UnboundedSender<OsTunnelEvent>,
}

impl LifecycleReporter {
    /// Create a reporter and the receiver the state machine consumes
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OsTunnelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn report(&self, event: OsTunnelEvent) {
        debug!(%event, "OS tunnel event");
        if self.tx.send(event).is_err() {
            debug!("State machine gone, dropping OS tunnel event");
        }
    }
}

/// Message shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAlert {
    pub title: String,
    pub message: String,
    /// Engine error code, when the alert came from the engine
    pub code: Option<String>,
}

/// Why the state machine wants the tunnel torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// The engine reported it terminated itself
    EngineTerminated,
    /// The engine reported an error before it ever registered
    RegistrationFailed,
}

/// Requests from the state machine to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineEvent {
    Teardown(TeardownReason),
    Alert(UserAlert),
}

/// Commands accepted by the state machine
#[derive(Debug)]
pub enum MachineCommand {
    /// A connect attempt begins
    ConnectRequested,
    /// A connect attempt failed before the tunnel came up
    ConnectFailed { reason: String },
    /// A user-initiated disconnect begins
    DisconnectRequested,
    /// The engine is rebinding its socket after a path change
    RebindStarted,
    /// A snapshot delivered outside the poll loop
    Snapshot(ConnectionSnapshot),
    /// Stop polling and reconciliation, acknowledging once both have stopped
    StopComponents { ack: oneshot::Sender<()> },
    Shutdown,
}

/// Cadence and options for the components the state machine drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    pub status_interval: Duration,
    pub settings_interval: Duration,
    pub override_dns: bool,
}

/// Cloneable handle to a running state machine
#[derive(Debug, Clone)]
pub struct StateMachineHandle {
    command_tx: mpsc::UnboundedSender<MachineCommand>,
    status_rx: watch::Receiver<TunnelStatus>,
}

impl StateMachineHandle {
    pub fn connect_requested(&self) {
        self.send(MachineCommand::ConnectRequested);
    }

    pub fn connect_failed(&self, reason: String) {
        self.send(MachineCommand::ConnectFailed { reason });
    }

    pub fn disconnect_requested(&self) {
        self.send(MachineCommand::DisconnectRequested);
    }

    pub fn rebind_started(&self) {
        self.send(MachineCommand::RebindStarted);
    }

    pub fn deliver_snapshot(&self, snapshot: ConnectionSnapshot) {
        self.send(MachineCommand::Snapshot(snapshot));
    }

    /// Stop polling and reconciliation, waiting until both are stopped
    pub async fn stop_components(&self) {
        let (ack, done) = oneshot::channel();
        if self
            .command_tx
            .send(MachineCommand::StopComponents { ack })
            .is_ok()
        {
            let _ = done.await;
        }
    }

    pub fn shutdown(&self) {
        self.send(MachineCommand::Shutdown);
    }

    /// Current status
    pub fn status(&self) -> TunnelStatus {
        *self.status_rx.borrow()
    }

    /// Receiver for status changes
    pub fn subscribe(&self) -> watch::Receiver<TunnelStatus> {
        self.status_rx.clone()
    }

    fn send(&self, command: MachineCommand) {
        if self.command_tx.send(command).is_err() {
            debug!("State machine is not running");
        }
    }
}

/// The orchestrating actor
pub struct ConnectionStateMachine {
    config: MachineConfig,
    engine: Arc<dyn TunnelEngine>,
    host: Arc<dyn TunnelHost>,
    status_tx: watch::Sender<TunnelStatus>,
    command_rx: mpsc::UnboundedReceiver<MachineCommand>,
    lifecycle_rx: mpsc::UnboundedReceiver<OsTunnelEvent>,
    snapshot_rx: mpsc::UnboundedReceiver<PolledSnapshot>,
    event_tx: mpsc::UnboundedSender<MachineEvent>,
    poller: StatusPoller,
    reconciler: Option<JoinHandle<()>>,
    os_state: OsTunnelEvent,
    alert_shown: bool,
}

impl ConnectionStateMachine {
    /// Create the state machine, its handle, and the stream of requests it makes
    pub fn new(
        config: MachineConfig,
        status_source: Arc<dyn StatusSource>,
        engine: Arc<dyn TunnelEngine>,
        host: Arc<dyn TunnelHost>,
        lifecycle_rx: mpsc::UnboundedReceiver<OsTunnelEvent>,
    ) -> (
        Self,
        StateMachineHandle,
        mpsc::UnboundedReceiver<MachineEvent>,
    ) {
        let (status_tx, status_rx) = watch::channel(TunnelStatus::Disconnected);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let machine = Self {
            config,
            engine,
            host,
            status_tx,
            command_rx,
            lifecycle_rx,
            snapshot_rx,
            event_tx,
            poller: StatusPoller::new(status_source, snapshot_tx),
            reconciler: None,
            os_state: OsTunnelEvent::Disconnected,
            alert_shown: false,
        };
        let handle = StateMachineHandle {
            command_tx,
            status_rx,
        };

        (machine, handle, event_rx)
    }

    /// Process inputs until shut down or every handle is dropped
    pub async fn run(mut self) {
        info!("Connection state machine started");

        loop {
            // Commands first: a connect request must be seen before the OS
            // events it causes
            tokio::select! {
                biased;
                command = self.command_rx.recv() => match command {
                    Some(MachineCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.lifecycle_rx.recv() => self.handle_os_event(event),
                Some(polled) = self.snapshot_rx.recv() => {
                    if polled.generation == self.poller.generation() && self.poller.is_running() {
                        self.handle_snapshot(polled.snapshot);
                    } else {
                        debug!(generation = polled.generation, "Dropping stale snapshot");
                    }
                }
            }
        }

        self.stop_components();
        info!("Connection state machine stopped");
    }

    fn handle_command(&mut self, command: MachineCommand) {
        match command {
            MachineCommand::ConnectRequested => {
                self.alert_shown = false;
                self.set_status(TunnelStatus::Starting);
            }
            MachineCommand::ConnectFailed { reason } => {
                error!(%reason, "Connect attempt failed");
                self.stop_components();
                self.set_status(TunnelStatus::Error);
                self.emit(MachineEvent::Alert(UserAlert {
                    title: "Failed to start tunnel".to_string(),
                    message: reason,
                    code: None,
                }));
            }
            MachineCommand::DisconnectRequested => {
                if self.current_status().is_active() {
                    self.set_status(TunnelStatus::Disconnecting);
                }
            }
            MachineCommand::RebindStarted => {
                if self.current_status() == TunnelStatus::Connected {
                    self.set_status(TunnelStatus::Reconnecting);
                }
                self.poller.invalidate();
            }
            MachineCommand::Snapshot(snapshot) => self.handle_snapshot(snapshot),
            MachineCommand::StopComponents { ack } => {
                self.stop_components();
                let _ = ack.send(());
            }
            MachineCommand::Shutdown => {}
        }
    }

    fn handle_os_event(&mut self, event: OsTunnelEvent) {
        debug!(%event, status = %self.current_status(), "Handling OS tunnel event");

        match &event {
            OsTunnelEvent::Disconnected => {
                self.stop_components();
                if self.current_status() != TunnelStatus::Starting {
                    self.set_status(TunnelStatus::Disconnected);
                }
            }
            OsTunnelEvent::Connecting => {
                self.poller.stop();
                self.set_status(TunnelStatus::Registering);
            }
            OsTunnelEvent::Connected => {
                if !self.poller.is_running() {
                    self.poller.start(self.config.status_interval);
                    self.set_status(TunnelStatus::Registering);
                }
                if self.reconciler.is_none() {
                    self.start_reconciler();
                }
            }
            OsTunnelEvent::Reasserting => {}
            OsTunnelEvent::Disconnecting => {
                self.stop_components();
                self.set_status(TunnelStatus::Disconnected);
            }
            OsTunnelEvent::Unknown(value) => {
                warn!(%value, "Unknown OS tunnel state");
                self.stop_components();
                self.set_status(TunnelStatus::Disconnected);
            }
        }

        self.os_state = event;
    }

    fn handle_snapshot(&mut self, snapshot: ConnectionSnapshot) {
        if self.os_state != OsTunnelEvent::Connected {
            debug!(os_state = %self.os_state, "Ignoring snapshot while interface is not connected");
            return;
        }

        if snapshot.terminated {
            info!("Engine terminated the tunnel");
            self.poller.stop();
            self.emit(MachineEvent::Teardown(TeardownReason::EngineTerminated));
            self.set_status(TunnelStatus::Disconnected);
            return;
        }

        if snapshot.is_fatal_pre_registration() {
            // One alert per connect attempt
            if self.alert_shown {
                debug!("Registration error already surfaced");
                return;
            }
            self.alert_shown = true;
            self.poller.stop();

            let (code, message) = snapshot
                .error
                .map(|fault| (fault.code, fault.message))
                .unwrap_or_default();
            error!(%code, %message, "Engine failed to register");

            self.emit(MachineEvent::Teardown(TeardownReason::RegistrationFailed));
            self.set_status(TunnelStatus::Disconnected);
            self.emit(MachineEvent::Alert(UserAlert {
                title: "Connection failed".to_string(),
                message,
                code: Some(code),
            }));
            return;
        }

        if snapshot.is_established() {
            self.set_status(TunnelStatus::Connected);
        } else {
            self.set_status(TunnelStatus::Registering);
        }
    }

    fn start_reconciler(&mut self) {
        let reconciler = SettingsReconciler::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.host),
            self.config.override_dns,
        );
        self.reconciler = Some(
            reconciler.spawn(self.config.settings_interval, self.event_tx.clone()),
        );
        debug!("Settings reconciliation started");
    }

    fn stop_components(&mut self) {
        self.poller.stop();
        if let Some(task) = self.reconciler.take() {
            task.abort();
            debug!("Settings reconciliation stopped");
        }
    }

    fn current_status(&self) -> TunnelStatus {
        *self.status_tx.borrow()
    }

    fn set_status(&self, status: TunnelStatus) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!(%status, "Tunnel status changed");
        }
    }

    fn emit(&self, event: MachineEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("No session listening for state machine events");
        }
    }
}
