//! Versioned network settings reconciliation
//!
//! The engine bumps a version counter whenever its view of the interface
//! configuration changes. The reconciler polls that counter and, on change,
//! fetches the partial snapshot, merges it onto what was last applied, and
//! pushes the result to the host.

use crate::engine::TunnelEngine;
use crate::error::SettingsError;
use crate::platform::TunnelHost;
use crate::vpn::network_settings::{AppliedConfig, NetworkConfigSnapshot};
use crate::vpn::state_machine::{MachineEvent, UserAlert};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Result of a single reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Version unchanged, nothing fetched
    Unchanged,
    /// Snapshot fetched but carried nothing to apply
    NoSettings,
    /// Merged configuration equals what is already applied
    AlreadyApplied,
    /// New configuration accepted by the host
    Applied,
}

/// Keeps the host interface in step with the engine's network settings
///
/// Owns the applied configuration for one tunnel session; a new reconciler
/// is created for every session.
pub struct SettingsReconciler {
    engine: Arc<dyn TunnelEngine>,
    host: Arc<dyn TunnelHost>,
    override_dns: bool,
    last_seen_version: Option<i64>,
    applied: Option<AppliedConfig>,
}

impl SettingsReconciler {
    pub fn new(engine: Arc<dyn TunnelEngine>, host: Arc<dyn TunnelHost>, override_dns: bool) -> Self {
        Self {
            engine,
            host,
            override_dns,
            last_seen_version: None,
            applied: None,
        }
    }

    /// Configuration last accepted by the host
    pub fn applied(&self) -> Option<&AppliedConfig> {
        self.applied.as_ref()
    }

    /// Run one reconciliation pass
    ///
    /// Any version change, up or down, triggers a refetch. A version is only
    /// marked as seen once its snapshot has been handled; if the host rejects
    /// the configuration the next pass retries it.
    pub async fn poll(&mut self) -> Result<ReconcileOutcome, SettingsError> {
        let version = self.engine.network_settings_version();
        if self.last_seen_version == Some(version) {
            return Ok(ReconcileOutcome::Unchanged);
        }

        debug!(version, previous = ?self.last_seen_version, "Network settings version changed");
        let raw = self.engine.network_settings();

        let snapshot = match NetworkConfigSnapshot::decode(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Refetching the same version would return the same document
                self.last_seen_version = Some(version);
                return Err(e);
            }
        };

        if snapshot.is_empty() {
            self.last_seen_version = Some(version);
            return Ok(ReconcileOutcome::NoSettings);
        }

        let merged = AppliedConfig::merge(self.applied.as_ref(), &snapshot, self.override_dns);
        if self.applied.as_ref() == Some(&merged) {
            self.last_seen_version = Some(version);
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        self.host.apply_network_settings(&merged).await?;

        info!(
            version,
            remote_address = %merged.remote_address,
            mtu = ?merged.mtu,
            "Applied network settings"
        );
        self.applied = Some(merged);
        self.last_seen_version = Some(version);
        Ok(ReconcileOutcome::Applied)
    }

    /// Poll on a fixed cadence until the task is aborted
    ///
    /// A host rejection is alerted once; further failures stay in the log
    /// until an apply succeeds again.
    pub fn spawn(
        mut self,
        interval: Duration,
        events: mpsc::UnboundedSender<MachineEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut failing = false;

            loop {
                ticker.tick().await;
                match self.poll().await {
                    Ok(ReconcileOutcome::Applied) => failing = false,
                    Ok(_) => {}
                    Err(SettingsError::Decode { reason }) => {
                        warn!(%reason, "Ignoring malformed network settings");
                    }
                    Err(e @ SettingsError::Apply(_)) => {
                        error!(error = %e, "Keeping previous network settings");
                        if !failing {
                            failing = true;
                            let alert = MachineEvent::Alert(UserAlert {
                                title: "Failed to apply network settings".to_string(),
                                message: e.to_string(),
                                code: None,
                            });
                            if events.send(alert).is_err() {
                                debug!("No state machine listening for settings alerts");
                            }
                        }
                    }
                }
            }
        })
    }
}
