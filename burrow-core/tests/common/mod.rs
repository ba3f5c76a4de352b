//! Fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use burrow_core::config::toml_config::TomlConfig;
use burrow_core::config::TunnelConfig;
use burrow_core::engine::{EngineStatus, StatusError, StatusSource, TunnelEngine};
use burrow_core::error::TunnelError;
use burrow_core::platform::{TunnelHost, TunnelInstaller};
use burrow_core::types::{ClientSecret, Credentials, PowerMode};
use burrow_core::vpn::network_monitor::{PathEvent, PathSource};
use burrow_core::vpn::network_settings::AppliedConfig;
use burrow_core::vpn::state::OsTunnelEvent;
use burrow_core::vpn::state_machine::LifecycleReporter;
use burrow_core::vpn::PollingPolicy;
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Ordered record of calls across fakes
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Let spawned tasks run without moving far in (paused) time
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub fn registered_status() -> EngineStatus {
    EngineStatus {
        connected: true,
        registered: Some(true),
        terminated: false,
        error: None,
        peers: None,
    }
}

pub fn sample_config() -> TomlConfig {
    TomlConfig::new(
        TunnelConfig::new(
            "https://pangolin.example.com".to_string(),
            "olm-test".to_string(),
        ),
        PollingPolicy::default(),
    )
}

pub fn sample_credentials() -> Credentials {
    Credentials {
        secret: ClientSecret::new("test-secret".to_string()),
        user_token: None,
    }
}

/// Engine whose replies and settings are set by the test
pub struct FakeEngine {
    log: CallLog,
    version: AtomicI64,
    settings: Mutex<String>,
    start_reply: Mutex<String>,
    settings_fetches: AtomicUsize,
    rebinds: AtomicUsize,
}

impl FakeEngine {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            version: AtomicI64::new(0),
            settings: Mutex::new("{}".to_string()),
            start_reply: Mutex::new("Tunnel started".to_string()),
            settings_fetches: AtomicUsize::new(0),
            rebinds: AtomicUsize::new(0),
        }
    }

    pub fn publish(&self, version: i64, settings: &str) {
        *self.settings.lock().unwrap() = settings.to_string();
        self.version.store(version, Ordering::SeqCst);
    }

    pub fn reply_to_start(&self, reply: &str) {
        *self.start_reply.lock().unwrap() = reply.to_string();
    }

    pub fn settings_fetches(&self) -> usize {
        self.settings_fetches.load(Ordering::SeqCst)
    }

    pub fn rebinds(&self) -> usize {
        self.rebinds.load(Ordering::SeqCst)
    }

    fn record(&self, call: &str) {
        self.log.lock().unwrap().push(format!("engine.{}", call));
    }
}

impl TunnelEngine for FakeEngine {
    fn start_tunnel(&self, _fd: i32, _config_json: &str) -> String {
        self.record("start_tunnel");
        self.start_reply.lock().unwrap().clone()
    }

    fn stop_tunnel(&self) -> String {
        self.record("stop_tunnel");
        "Tunnel stopped".to_string()
    }

    fn network_settings_version(&self) -> i64 {
        self.version.load(Ordering::SeqCst)
    }

    fn network_settings(&self) -> String {
        self.settings_fetches.fetch_add(1, Ordering::SeqCst);
        self.settings.lock().unwrap().clone()
    }

    fn set_power_mode(&self, mode: PowerMode) -> String {
        self.record(&format!("set_power_mode({})", mode));
        format!("Power mode set to: {}", mode)
    }

    fn rebind_socket(&self) -> String {
        self.record("rebind_socket");
        self.rebinds.fetch_add(1, Ordering::SeqCst);
        "Socket rebound successfully".to_string()
    }
}

/// Host that records calls and reports lifecycle events like a real one
pub struct FakeHost {
    log: CallLog,
    reporter: LifecycleReporter,
    applied: Mutex<Vec<AppliedConfig>>,
    fail_apply: AtomicBool,
    fail_open: AtomicBool,
}

impl FakeHost {
    pub fn new(log: CallLog, reporter: LifecycleReporter) -> Self {
        Self {
            log,
            reporter,
            applied: Mutex::new(Vec::new()),
            fail_apply: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
        }
    }

    pub fn fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn applied(&self) -> Vec<AppliedConfig> {
        self.applied.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.log.lock().unwrap().push(format!("host.{}", call));
    }
}

#[async_trait]
impl TunnelHost for FakeHost {
    async fn open_tunnel(&self) -> Result<RawFd, TunnelError> {
        self.record("open_tunnel");
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TunnelError::Device {
                reason: "permission denied".to_string(),
            });
        }
        self.reporter.report(OsTunnelEvent::Connecting);
        Ok(42)
    }

    async fn complete_start(&self) -> Result<(), TunnelError> {
        self.record("complete_start");
        self.reporter.report(OsTunnelEvent::Connected);
        Ok(())
    }

    async fn apply_network_settings(&self, config: &AppliedConfig) -> Result<(), TunnelError> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(TunnelError::ApplyFailed {
                reason: "rejected by test".to_string(),
            });
        }
        self.record("apply_network_settings");
        self.applied.lock().unwrap().push(config.clone());
        Ok(())
    }

    async fn cancel_tunnel(&self, _reason: &str) {
        self.record("cancel_tunnel");
        self.reporter.report(OsTunnelEvent::Disconnecting);
        self.reporter.report(OsTunnelEvent::Disconnected);
    }
}

/// Status source that plays back a script, repeating its final entry
pub struct ScriptedStatusSource {
    script: Mutex<VecDeque<Result<EngineStatus, StatusError>>>,
    last: Mutex<Result<EngineStatus, StatusError>>,
    fetches: AtomicUsize,
}

impl ScriptedStatusSource {
    pub fn new(script: Vec<Result<EngineStatus, StatusError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(Err(StatusError::Unreachable("not started".to_string()))),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self::new(Vec::new())
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for ScriptedStatusSource {
    async fn fetch(&self) -> Result<EngineStatus, StatusError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *last = next;
        }
        last.clone()
    }
}

/// Path source fed by the test through a channel
pub struct ChannelPathSource {
    events: Mutex<Option<mpsc::UnboundedReceiver<PathEvent>>>,
}

impl ChannelPathSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<PathEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                events: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl PathSource for ChannelPathSource {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PathEvent> {
        self.events
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| mpsc::unbounded_channel().1)
    }
}

/// Installer that always succeeds
pub struct NoopInstaller;

#[async_trait]
impl TunnelInstaller for NoopInstaller {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn ensure_installed(&self) -> Result<(), TunnelError> {
        Ok(())
    }
}
