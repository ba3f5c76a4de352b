//! Foreground tunnel session
//!
//! Composes the Linux host, the engine, the status channel and the
//! NetworkManager path source into a `TunnelSession`, then reports status
//! changes until the tunnel goes down or the user interrupts.

use burrow_core::config::toml_config::{self, TomlConfig};
use burrow_core::engine::{HttpStatusSource, TunnelEngine};
use burrow_core::error::{BurrowError, ConfigError, EngineError};
use burrow_core::platform::{installer_for, LinuxTunnelHost};
use burrow_core::types::{Credentials, PowerMode, ENV_SECRET};
use burrow_core::vpn::network_monitor::{NetworkManagerPathSource, PathSource};
use burrow_core::vpn::state_machine::{LifecycleReporter, UserAlert};
use burrow_core::vpn::{SessionParts, TunnelSession, TunnelStatus};
use colored::Colorize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

const PROFILE_FILE_NAME: &str = "profile.toml";

/// Run the up command
pub fn run_up(power_mode: Option<PowerMode>, engine_log_level: &str) -> Result<(), BurrowError> {
    let config = toml_config::load_config()?;
    let credentials = Credentials::from_env().ok_or_else(|| ConfigError::MissingField {
        field: ENV_SECRET.to_string(),
    })?;
    println!("Loaded configuration for endpoint: {}", config.tunnel.endpoint);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_session(config, credentials, power_mode, engine_log_level))
}

async fn run_session(
    config: TomlConfig,
    credentials: Credentials,
    power_mode: Option<PowerMode>,
    engine_log_level: &str,
) -> Result<(), BurrowError> {
    let engine = load_engine(engine_log_level)?;

    let (reporter, lifecycle_rx) = LifecycleReporter::channel();
    let host = Arc::new(LinuxTunnelHost::new(&config.tunnel, reporter)?);

    let status_source = Arc::new(
        HttpStatusSource::new(
            config.polling.status_endpoint.clone(),
            config.polling.status_timeout(),
        )
        .map_err(|_| ConfigError::InvalidEndpoint {
            endpoint: config.polling.status_endpoint.clone(),
        })?,
    );

    let profile_path = toml_config::get_config_dir()?.join(PROFILE_FILE_NAME);
    let installer = installer_for(config.tunnel.install_mode, profile_path, &config);

    let path_source: Option<Box<dyn PathSource>> = match NetworkManagerPathSource::connect().await
    {
        Ok(source) => Some(Box::new(source)),
        Err(e) => {
            warn!(error = %e, "Network path monitoring unavailable, socket rebinds disabled");
            None
        }
    };

    let mut session = TunnelSession::start(SessionParts {
        config,
        credentials,
        engine,
        host,
        status_source,
        installer,
        path_source,
        lifecycle_rx,
    })
    .with_device_info(device_fingerprint(), BTreeMap::new());

    let mut alerts = session.take_alerts();
    let mut status_rx = session.subscribe_status();

    if let Err(e) = session.connect().await {
        if let Some(alerts) = alerts.as_mut() {
            // The supervisor forwards the alert asynchronously
            tokio::task::yield_now().await;
            while let Ok(alert) = alerts.try_recv() {
                print_alert(&alert);
            }
        }
        session.close().await;
        return Err(e);
    }
    println!("{} Tunnel started, press Ctrl+C to disconnect", "✓".green());

    if let Some(mode) = power_mode {
        match session.set_power_mode(mode) {
            Ok(()) => println!("Power mode set to {}", mode),
            Err(e) => warn!(error = %e, "Failed to set power mode"),
        }
    }

    let mut terminate = signal(SignalKind::terminate())?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    print_status(*status_rx.borrow_and_update());
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, disconnecting");
                break;
            }
            _ = terminate.recv() => {
                info!("Terminated, disconnecting");
                break;
            }
            Some(alert) = recv_alert(&mut alerts) => print_alert(&alert),
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *status_rx.borrow_and_update();
                print_status(status);
                if !status.is_active() {
                    break;
                }
            }
        }
    }

    println!("Disconnecting...");
    session.close().await;
    println!("Disconnected");
    Ok(())
}

async fn recv_alert(
    alerts: &mut Option<tokio::sync::mpsc::UnboundedReceiver<UserAlert>>,
) -> Option<UserAlert> {
    match alerts {
        Some(alerts) => alerts.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(feature = "olm-ffi")]
fn load_engine(log_level: &str) -> Result<Arc<dyn TunnelEngine>, EngineError> {
    use burrow_core::engine::{ffi::OlmEngine, InitRequest};

    let engine = OlmEngine::init(&InitRequest::for_client(log_level))?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "olm-ffi"))]
fn load_engine(_log_level: &str) -> Result<Arc<dyn TunnelEngine>, EngineError> {
    Err(EngineError::Unavailable {
        reason: "burrow was built without the olm-ffi feature".to_string(),
    })
}

fn device_fingerprint() -> BTreeMap<String, serde_json::Value> {
    BTreeMap::from([
        ("platform".to_string(), std::env::consts::OS.into()),
        ("arch".to_string(), std::env::consts::ARCH.into()),
        ("clientVersion".to_string(), env!("CARGO_PKG_VERSION").into()),
    ])
}

fn print_status(status: TunnelStatus) {
    let timestamp = chrono::Local::now().format("%H:%M:%S");
    let label = status.to_string();
    let label = match status {
        TunnelStatus::Connected => label.green().bold(),
        TunnelStatus::Error => label.red().bold(),
        TunnelStatus::Disconnected => label.dimmed(),
        _ => label.yellow(),
    };
    println!("[{}] {}", timestamp, label);
}

fn print_alert(alert: &UserAlert) {
    let code = alert
        .code
        .as_deref()
        .map(|code| format!(" ({})", code))
        .unwrap_or_default();
    eprintln!(
        "{} {}{}: {}",
        "✗".red(),
        alert.title.bold(),
        code,
        alert.message
    );
}
