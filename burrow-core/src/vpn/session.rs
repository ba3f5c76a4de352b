//! Tunnel session
//!
//! Wires the engine, the host, the state machine and the path watcher
//! together for one connect/disconnect cycle, and owns the ordered teardown.

use crate::config::toml_config::TomlConfig;
use crate::config::TunnelConfig;
use crate::engine::{interpret_reply, StartTunnelRequest, StatusSource, TunnelEngine};
use crate::error::{BurrowError, EngineError};
use crate::platform::{TunnelHost, TunnelInstaller};
use crate::types::{Credentials, PowerMode};
use crate::vpn::network_monitor::{NetworkTransitionWatcher, PathSource, RebindRequested};
use crate::vpn::state::{OsTunnelEvent, TunnelStatus};
use crate::vpn::state_machine::{
    ConnectionStateMachine, MachineConfig, MachineEvent, StateMachineHandle, TeardownReason,
    UserAlert,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Collaborators a session is built from
pub struct SessionParts {
    pub config: TomlConfig,
    pub credentials: Credentials,
    pub engine: Arc<dyn TunnelEngine>,
    pub host: Arc<dyn TunnelHost>,
    pub status_source: Arc<dyn StatusSource>,
    pub installer: Box<dyn TunnelInstaller>,
    /// Without a path source the session never rebinds
    pub path_source: Option<Box<dyn PathSource>>,
    /// Receiver paired with the `LifecycleReporter` given to `host`
    pub lifecycle_rx: mpsc::UnboundedReceiver<OsTunnelEvent>,
}

/// Stops everything in order, at most once per tunnel
struct Teardown {
    watcher: Arc<NetworkTransitionWatcher>,
    machine: StateMachineHandle,
    host: Arc<dyn TunnelHost>,
    engine: Arc<dyn TunnelEngine>,
    armed: AtomicBool,
}

impl Teardown {
    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Watcher, then polling and reconciliation, then the interface and engine
    async fn run(&self, reason: &str) {
        if !self.armed.swap(false, Ordering::SeqCst) {
            debug!(%reason, "Tunnel already torn down");
            return;
        }
        info!(%reason, "Tearing down tunnel");

        self.watcher.stop();
        self.machine.stop_components().await;
        self.host.cancel_tunnel(reason).await;

        match interpret_reply(&self.engine.stop_tunnel()) {
            Ok(message) => debug!(%message, "Engine stopped"),
            Err(e) => debug!(error = %e, "Engine stop reported an error"),
        }
    }
}

/// A running tunnel session
pub struct TunnelSession {
    tunnel: TunnelConfig,
    credentials: Credentials,
    engine: Arc<dyn TunnelEngine>,
    host: Arc<dyn TunnelHost>,
    installer: Box<dyn TunnelInstaller>,
    path_source: Option<Box<dyn PathSource>>,
    watcher: Arc<NetworkTransitionWatcher>,
    machine: StateMachineHandle,
    teardown: Arc<Teardown>,
    rebind_tx: mpsc::UnboundedSender<RebindRequested>,
    alerts_rx: Option<mpsc::UnboundedReceiver<UserAlert>>,
    fingerprint: BTreeMap<String, serde_json::Value>,
    postures: BTreeMap<String, serde_json::Value>,
    tasks: Vec<JoinHandle<()>>,
}

impl TunnelSession {
    /// Spawn the state machine and the session supervisor
    pub fn start(parts: SessionParts) -> Self {
        let SessionParts {
            config,
            credentials,
            engine,
            host,
            status_source,
            installer,
            path_source,
            lifecycle_rx,
        } = parts;

        let machine_config = MachineConfig {
            status_interval: config.polling.status_interval(),
            settings_interval: config.polling.settings_interval(),
            override_dns: config.tunnel.override_dns,
        };
        let (machine, handle, machine_events) = ConnectionStateMachine::new(
            machine_config,
            status_source,
            Arc::clone(&engine),
            Arc::clone(&host),
            lifecycle_rx,
        );

        let watcher = Arc::new(NetworkTransitionWatcher::new(
            config.polling.rebind_debounce(),
        ));
        let teardown = Arc::new(Teardown {
            watcher: Arc::clone(&watcher),
            machine: handle.clone(),
            host: Arc::clone(&host),
            engine: Arc::clone(&engine),
            armed: AtomicBool::new(false),
        });

        let (rebind_tx, rebind_rx) = mpsc::unbounded_channel();
        let (alerts_tx, alerts_rx) = mpsc::unbounded_channel();

        let machine_task = tokio::spawn(machine.run());
        let supervisor = tokio::spawn(supervise(
            machine_events,
            rebind_rx,
            alerts_tx,
            handle.clone(),
            Arc::clone(&engine),
            Arc::clone(&teardown),
        ));

        Self {
            tunnel: config.tunnel,
            credentials,
            engine,
            host,
            installer,
            path_source,
            watcher,
            machine: handle,
            teardown,
            rebind_tx,
            alerts_rx: Some(alerts_rx),
            fingerprint: BTreeMap::new(),
            postures: BTreeMap::new(),
            tasks: vec![machine_task, supervisor],
        }
    }

    /// Attach device fingerprint and posture data collected elsewhere
    pub fn with_device_info(
        mut self,
        fingerprint: BTreeMap<String, serde_json::Value>,
        postures: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        self.fingerprint = fingerprint;
        self.postures = postures;
        self
    }

    /// Bring the tunnel up
    ///
    /// Status becomes `starting` immediately. On failure the tunnel is torn
    /// down and the user is alerted.
    #[tracing::instrument(skip(self), fields(endpoint = %self.tunnel.endpoint))]
    pub async fn connect(&self) -> Result<(), BurrowError> {
        self.machine.connect_requested();

        match self.establish().await {
            Ok(()) => {
                info!("Tunnel started");
                Ok(())
            }
            Err(e) => {
                self.machine.connect_failed(e.to_string());
                // Teardown only stops the watcher once the tunnel is armed
                self.watcher.stop();
                self.teardown.run("connect failed").await;
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<(), BurrowError> {
        debug!(installer = self.installer.name(), "Checking tunnel prerequisites");
        self.installer.ensure_installed().await?;

        let fd = self.host.open_tunnel().await?;
        self.teardown.arm();

        if let Some(source) = &self.path_source {
            self.watcher.start(source.subscribe(), self.rebind_tx.clone());
        }

        let request =
            StartTunnelRequest::new(&self.tunnel, &self.credentials, &self.fingerprint, &self.postures)
                .to_json()?;
        let reply = self.engine.start_tunnel(fd, &request);
        let message = interpret_reply(&reply)?;
        debug!(%message, "Engine accepted tunnel");

        self.host.complete_start().await?;
        Ok(())
    }

    /// Switch the engine's power mode
    pub fn set_power_mode(&self, mode: PowerMode) -> Result<(), EngineError> {
        let reply = self.engine.set_power_mode(mode);
        let message = interpret_reply(&reply)?;
        info!(%mode, %message, "Power mode changed");
        Ok(())
    }

    /// Tear the tunnel down
    pub async fn disconnect(&self) {
        self.machine.disconnect_requested();
        self.teardown.run("user requested disconnect").await;
    }

    /// Disconnect and stop the session's background tasks
    pub async fn close(mut self) {
        self.disconnect().await;
        self.machine.shutdown();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    pub fn status(&self) -> TunnelStatus {
        self.machine.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TunnelStatus> {
        self.machine.subscribe()
    }

    /// Take the stream of user-facing alerts (available once)
    pub fn take_alerts(&mut self) -> Option<mpsc::UnboundedReceiver<UserAlert>> {
        self.alerts_rx.take()
    }

    /// Handle to the state machine
    pub fn machine(&self) -> &StateMachineHandle {
        &self.machine
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Act on state machine requests and path-change rebinds
async fn supervise(
    mut machine_events: mpsc::UnboundedReceiver<MachineEvent>,
    mut rebind_rx: mpsc::UnboundedReceiver<RebindRequested>,
    alerts_tx: mpsc::UnboundedSender<UserAlert>,
    machine: StateMachineHandle,
    engine: Arc<dyn TunnelEngine>,
    teardown: Arc<Teardown>,
) {
    loop {
        tokio::select! {
            event = machine_events.recv() => match event {
                Some(MachineEvent::Alert(alert)) => {
                    if alerts_tx.send(alert).is_err() {
                        debug!("Nobody is listening for alerts");
                    }
                }
                Some(MachineEvent::Teardown(reason)) => {
                    let reason = match reason {
                        TeardownReason::EngineTerminated => "engine terminated",
                        TeardownReason::RegistrationFailed => "registration failed",
                    };
                    teardown.run(reason).await;
                }
                None => break,
            },
            Some(RebindRequested) = rebind_rx.recv() => {
                machine.rebind_started();
                match interpret_reply(&engine.rebind_socket()) {
                    Ok(message) => info!(%message, "Engine socket rebound"),
                    Err(EngineError::Rejected { message }) => {
                        warn!(%message, "Engine refused to rebind socket");
                    }
                    Err(e) => error!(error = %e, "Socket rebind failed"),
                }
            }
        }
    }
}
