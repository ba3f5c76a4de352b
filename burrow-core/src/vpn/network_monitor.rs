//! Network path monitoring
//!
//! Detects when the host's network path changes underneath the tunnel
//! (WiFi to wired, network regained after an outage) and asks the session to
//! rebind the engine's socket. Path events come from NetworkManager over
//! D-Bus.

use futures_util::StreamExt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use zbus::Connection;

const NM_SERVICE: &str = "org.freedesktop.NetworkManager";
const NM_PATH: &str = "/org/freedesktop/NetworkManager";

/// NM_STATE_CONNECTED_GLOBAL
const NM_STATE_CONNECTED_GLOBAL: u32 = 70;

/// Kind of interface carrying the host's primary path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceType {
    Wifi,
    Wired,
    Cellular,
    Loopback,
    Other,
    None,
}

impl InterfaceType {
    /// Map NetworkManager's `PrimaryConnectionType`
    pub fn from_nm_connection_type(value: &str) -> Self {
        match value {
            "802-11-wireless" => InterfaceType::Wifi,
            "802-3-ethernet" => InterfaceType::Wired,
            "gsm" | "cdma" => InterfaceType::Cellular,
            "loopback" => InterfaceType::Loopback,
            "" => InterfaceType::None,
            _ => InterfaceType::Other,
        }
    }
}

/// A change in the host's network path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathEvent {
    pub interface_type: InterfaceType,
    /// Whether the path can currently reach the network
    pub is_satisfied: bool,
}

/// Emitted once a burst of path changes has settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebindRequested;

/// Decides which path events warrant a rebind
///
/// Only the previous event is retained. The first event never triggers.
#[derive(Debug, Default)]
pub struct PathTracker {
    previous: Option<PathEvent>,
}

impl PathTracker {
    pub fn observe(&mut self, event: PathEvent) -> bool {
        let trigger = match self.previous {
            None => false,
            Some(previous) => {
                let type_changed =
                    event.is_satisfied && previous.interface_type != event.interface_type;
                let regained = !previous.is_satisfied && event.is_satisfied;
                type_changed || regained
            }
        };
        self.previous = Some(event);
        trigger
    }
}

/// Source of path change events
pub trait PathSource: Send + Sync {
    /// Begin delivering events; dropping the receiver unsubscribes
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PathEvent>;
}

/// Debounces path changes into rebind requests
pub struct NetworkTransitionWatcher {
    debounce: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkTransitionWatcher {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            task: Mutex::new(None),
        }
    }

    /// Start watching `events`, replacing any previous subscription
    ///
    /// Each trigger restarts the debounce timer; only the last one in a burst
    /// produces a `RebindRequested`.
    pub fn start(
        &self,
        mut events: mpsc::UnboundedReceiver<PathEvent>,
        rebind_tx: mpsc::UnboundedSender<RebindRequested>,
    ) {
        let debounce = self.debounce;
        let task = tokio::spawn(async move {
            let mut tracker = PathTracker::default();
            let mut deadline: Option<Instant> = None;

            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else {
                            if let Some(pending) = deadline.take() {
                                sleep_until(pending).await;
                                let _ = rebind_tx.send(RebindRequested);
                            }
                            break;
                        };
                        if tracker.observe(event) {
                            debug!(?event, "Network path changed, rebind pending");
                            deadline = Some(Instant::now() + debounce);
                        }
                    }
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        deadline = None;
                        info!("Network path settled, requesting socket rebind");
                        if rebind_tx.send(RebindRequested).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        if let Some(previous) = self.lock_task().replace(task) {
            previous.abort();
        }
    }

    /// Cancel any pending rebind and unsubscribe
    pub fn stop(&self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
            debug!("Network transition watcher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_task()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for NetworkTransitionWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Path events derived from NetworkManager's global state
pub struct NetworkManagerPathSource {
    connection: Connection,
}

impl NetworkManagerPathSource {
    /// Connect to the system bus and verify NetworkManager is present
    ///
    /// # Errors
    ///
    /// Returns `NetworkMonitorError` if D-Bus connection fails or NetworkManager is unavailable
    #[tracing::instrument]
    pub async fn connect() -> Result<Self, NetworkMonitorError> {
        let connection = Connection::system().await?;

        let proxy = zbus::fdo::DBusProxy::new(&connection).await?;
        let bus_name = zbus::names::BusName::try_from(NM_SERVICE)
            .map_err(|e| NetworkMonitorError::QueryFailed(e.to_string()))?;
        let name_has_owner = proxy
            .name_has_owner(bus_name)
            .await
            .map_err(|e| NetworkMonitorError::QueryFailed(e.to_string()))?;

        if !name_has_owner {
            return Err(NetworkMonitorError::NetworkManagerUnavailable);
        }

        Ok(Self { connection })
    }
}

impl PathSource for NetworkManagerPathSource {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PathEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = self.connection.clone();

        tokio::spawn(async move {
            if let Err(e) = watch_network_manager(connection, tx).await {
                warn!(error = %e, "NetworkManager path monitoring ended");
            }
        });

        rx
    }
}

async fn watch_network_manager(
    connection: Connection,
    tx: mpsc::UnboundedSender<PathEvent>,
) -> Result<(), NetworkMonitorError> {
    let proxy = zbus::Proxy::new(&connection, NM_SERVICE, NM_PATH, NM_SERVICE).await?;

    let state_changes = proxy.receive_property_changed::<u32>("State").await;
    let type_changes = proxy
        .receive_property_changed::<String>("PrimaryConnectionType")
        .await;
    tokio::pin!(state_changes);
    tokio::pin!(type_changes);

    if tx.send(read_path(&proxy).await?).is_err() {
        return Ok(());
    }

    loop {
        tokio::select! {
            Some(_) = state_changes.next() => {}
            Some(_) = type_changes.next() => {}
            _ = tx.closed() => return Ok(()),
            else => return Ok(()),
        }

        match read_path(&proxy).await {
            Ok(event) => {
                if tx.send(event).is_err() {
                    return Ok(());
                }
            }
            Err(e) => warn!(error = %e, "Failed to read network path"),
        }
    }
}

async fn read_path(proxy: &zbus::Proxy<'_>) -> Result<PathEvent, NetworkMonitorError> {
    let state: u32 = proxy
        .get_property("State")
        .await
        .map_err(|e| NetworkMonitorError::QueryFailed(e.to_string()))?;
    let connection_type: String = proxy
        .get_property("PrimaryConnectionType")
        .await
        .map_err(|e| NetworkMonitorError::QueryFailed(e.to_string()))?;

    Ok(PathEvent {
        interface_type: InterfaceType::from_nm_connection_type(&connection_type),
        is_satisfied: state == NM_STATE_CONNECTED_GLOBAL,
    })
}

/// Errors that can occur during network monitoring
#[derive(Debug, thiserror::Error)]
pub enum NetworkMonitorError {
    #[error("D-Bus connection failed: {0}")]
    DBusConnectionFailed(#[from] zbus::Error),

    #[error("NetworkManager not available")]
    NetworkManagerUnavailable,

    #[error("Failed to query network state: {0}")]
    QueryFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(interface_type: InterfaceType, is_satisfied: bool) -> PathEvent {
        PathEvent {
            interface_type,
            is_satisfied,
        }
    }

    #[test]
    fn test_first_event_never_triggers() {
        let mut tracker = PathTracker::default();
        assert!(!tracker.observe(event(InterfaceType::Wifi, true)));
    }

    #[test]
    fn test_trigger_rules() {
        let mut tracker = PathTracker::default();
        tracker.observe(event(InterfaceType::Wifi, true));

        // Same path again
        assert!(!tracker.observe(event(InterfaceType::Wifi, true)));
        // Type change while satisfied
        assert!(tracker.observe(event(InterfaceType::Wired, true)));
        // Losing the network is not a trigger
        assert!(!tracker.observe(event(InterfaceType::None, false)));
        // Type change while unsatisfied is not a trigger
        assert!(!tracker.observe(event(InterfaceType::Cellular, false)));
        // Regaining the network is
        assert!(tracker.observe(event(InterfaceType::Cellular, true)));
    }

    #[test]
    fn test_nm_connection_types() {
        assert_eq!(
            InterfaceType::from_nm_connection_type("802-11-wireless"),
            InterfaceType::Wifi
        );
        assert_eq!(
            InterfaceType::from_nm_connection_type("802-3-ethernet"),
            InterfaceType::Wired
        );
        assert_eq!(InterfaceType::from_nm_connection_type("gsm"), InterfaceType::Cellular);
        assert_eq!(InterfaceType::from_nm_connection_type("vpn"), InterfaceType::Other);
        assert_eq!(InterfaceType::from_nm_connection_type(""), InterfaceType::None);
    }
}
