//! Integration tests for path-change debouncing

use burrow_core::vpn::network_monitor::{
    InterfaceType, NetworkTransitionWatcher, PathEvent, RebindRequested,
};
use std::time::Duration;
use tokio::sync::mpsc;

const DEBOUNCE: Duration = Duration::from_millis(2500);

fn path(interface_type: InterfaceType, is_satisfied: bool) -> PathEvent {
    PathEvent {
        interface_type,
        is_satisfied,
    }
}

fn start_watcher() -> (
    NetworkTransitionWatcher,
    mpsc::UnboundedSender<PathEvent>,
    mpsc::UnboundedReceiver<RebindRequested>,
) {
    let watcher = NetworkTransitionWatcher::new(DEBOUNCE);
    let (path_tx, path_rx) = mpsc::unbounded_channel();
    let (rebind_tx, rebind_rx) = mpsc::unbounded_channel();
    watcher.start(path_rx, rebind_tx);
    (watcher, path_tx, rebind_rx)
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_changes_rebinds_once_after_last() {
    let (_watcher, path_tx, mut rebind_rx) = start_watcher();

    let burst = [
        InterfaceType::Wifi,
        InterfaceType::Wired,
        InterfaceType::Wifi,
        InterfaceType::Wired,
        InterfaceType::Wifi,
    ];
    for (index, interface_type) in burst.into_iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        path_tx.send(path(interface_type, true)).unwrap();
    }

    // Last event at 800ms; the rebind is due at 3300ms
    tokio::time::sleep(Duration::from_millis(2450)).await;
    assert!(rebind_rx.try_recv().is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rebind_rx.try_recv(), Ok(RebindRequested));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(rebind_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_network_regained_triggers_rebind() {
    let (_watcher, path_tx, mut rebind_rx) = start_watcher();

    path_tx.send(path(InterfaceType::Wifi, true)).unwrap();
    path_tx.send(path(InterfaceType::None, false)).unwrap();
    tokio::time::sleep(DEBOUNCE * 2).await;
    assert!(rebind_rx.try_recv().is_err());

    path_tx.send(path(InterfaceType::Wifi, true)).unwrap();
    tokio::time::sleep(DEBOUNCE + Duration::from_millis(50)).await;
    assert_eq!(rebind_rx.try_recv(), Ok(RebindRequested));
}

#[tokio::test(start_paused = true)]
async fn test_first_event_alone_does_not_rebind() {
    let (_watcher, path_tx, mut rebind_rx) = start_watcher();

    path_tx.send(path(InterfaceType::Wired, true)).unwrap();
    tokio::time::sleep(DEBOUNCE * 2).await;
    assert!(rebind_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_rebind() {
    let (watcher, path_tx, mut rebind_rx) = start_watcher();

    path_tx.send(path(InterfaceType::Wifi, true)).unwrap();
    path_tx.send(path(InterfaceType::Cellular, true)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(watcher.is_running());

    watcher.stop();
    assert!(!watcher.is_running());
    tokio::time::sleep(DEBOUNCE * 2).await;
    assert!(rebind_rx.try_recv().is_err());
}
