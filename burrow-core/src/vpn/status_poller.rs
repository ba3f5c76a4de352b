//! Periodic engine status polling
//!
//! The engine's registration state is only available through a polled
//! status channel. `StatusPoller` queries it on a fixed cadence and forwards
//! a snapshot to the state machine whenever it materially changes.

use crate::engine::StatusSource;
use crate::vpn::state::ConnectionSnapshot;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A snapshot tagged with the poll loop that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolledSnapshot {
    pub generation: u64,
    pub snapshot: ConnectionSnapshot,
}

type SnapshotCache = Arc<Mutex<Option<ConnectionSnapshot>>>;

/// Repeating engine status query
///
/// At most one poll loop exists at a time. Every `start` bumps the
/// generation so the consumer can discard snapshots from a cancelled loop
/// that were already in flight.
pub struct StatusPoller {
    source: Arc<dyn StatusSource>,
    snapshot_tx: mpsc::UnboundedSender<PolledSnapshot>,
    task: Option<JoinHandle<()>>,
    last_known: SnapshotCache,
    generation: u64,
}

impl StatusPoller {
    pub fn new(
        source: Arc<dyn StatusSource>,
        snapshot_tx: mpsc::UnboundedSender<PolledSnapshot>,
    ) -> Self {
        Self {
            source,
            snapshot_tx,
            task: None,
            last_known: Arc::new(Mutex::new(None)),
            generation: 0,
        }
    }

    /// Start polling, replacing any running loop
    #[tracing::instrument(skip(self), fields(generation = self.generation + 1))]
    pub fn start(&mut self, interval: Duration) {
        if let Some(task) = self.task.take() {
            debug!("Restarting status poller");
            task.abort();
        }
        self.generation += 1;

        let source = Arc::clone(&self.source);
        let tx = self.snapshot_tx.clone();
        let cache = Arc::clone(&self.last_known);
        let generation = self.generation;

        self.task = Some(tokio::spawn(async move {
            poll_loop(source, tx, cache, generation, interval).await;
        }));
        info!(interval_ms = interval.as_millis() as u64, "Status polling started");
    }

    /// Stop polling and forget the last known status
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Status polling stopped");
        }
        self.clear_cache();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Forward the next snapshot even if it matches the cached one
    pub fn invalidate(&self) {
        self.clear_cache();
    }

    /// Generation of the current (or most recent) poll loop
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Last snapshot observed by the running loop
    pub fn last_known(&self) -> Option<ConnectionSnapshot> {
        self.last_known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn clear_cache(&self) {
        *self.last_known.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn poll_loop(
    source: Arc<dyn StatusSource>,
    tx: mpsc::UnboundedSender<PolledSnapshot>,
    cache: SnapshotCache,
    generation: u64,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures = 0u32;

    loop {
        ticker.tick().await;

        let status = match source.fetch().await {
            Ok(status) => status,
            Err(e) => {
                // The engine may not be listening yet; keep whatever we knew
                consecutive_failures += 1;
                if consecutive_failures == 1 {
                    warn!(error = %e, "Engine status unavailable");
                } else {
                    debug!(error = %e, failures = consecutive_failures, "Engine status still unavailable");
                }
                continue;
            }
        };

        if consecutive_failures > 0 {
            debug!(failures = consecutive_failures, "Engine status channel recovered");
            consecutive_failures = 0;
        }

        let snapshot = status.snapshot();
        let changed = {
            let mut last = cache.lock().unwrap_or_else(PoisonError::into_inner);
            if last.as_ref() == Some(&snapshot) {
                false
            } else {
                *last = Some(snapshot.clone());
                true
            }
        };

        if changed {
            debug!(
                connected = snapshot.connected,
                registered = ?snapshot.registered,
                terminated = snapshot.terminated,
                peers = status.connected_peers(),
                "Engine status changed"
            );
            if tx.send(PolledSnapshot { generation, snapshot }).is_err() {
                debug!("Snapshot receiver dropped, stopping status poller");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineStatus, StatusError};
    use async_trait::async_trait;

    struct FixedSource(EngineStatus);

    #[async_trait]
    impl StatusSource for FixedSource {
        async fn fetch(&self) -> Result<EngineStatus, StatusError> {
            Ok(self.0.clone())
        }
    }

    fn registered() -> EngineStatus {
        EngineStatus {
            connected: true,
            registered: Some(true),
            terminated: false,
            error: None,
            peers: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_status_is_forwarded_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poller = StatusPoller::new(Arc::new(FixedSource(registered())), tx);

        poller.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(3500)).await;

        let first = rx.try_recv().unwrap();
        assert_eq!(first.generation, 1);
        assert!(first.snapshot.is_established());
        assert!(rx.try_recv().is_err());

        poller.stop();
        assert!(poller.last_known().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_bumps_generation_and_replaces_loop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poller = StatusPoller::new(Arc::new(FixedSource(registered())), tx);

        poller.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        poller.invalidate();
        poller.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(poller.is_running());
        assert_eq!(poller.generation(), 2);
        let generations: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|p| p.generation)
            .collect();
        assert_eq!(generations, vec![1, 2]);
    }
}
