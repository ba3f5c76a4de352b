//! Engine log forwarding
//!
//! The engine writes its own log lines through a C callback carrying a
//! subsystem, a category and a numeric severity. They are re-emitted as
//! `tracing` events under the `olm` target so `RUST_LOG=olm=debug` controls
//! them like any other module.

use tracing::{debug, error, info, warn, Level};

/// Map the engine's severity scale onto a `tracing` level
///
/// 0 is debug, 1 info, 2 the default (warn), 3 error and 4 a fault, which
/// has no stronger counterpart than error. Unknown values use the default.
pub fn engine_log_level(level: i32) -> Level {
    match level {
        0 => Level::DEBUG,
        1 => Level::INFO,
        3 | 4 => Level::ERROR,
        _ => Level::WARN,
    }
}

/// Re-emit one engine log line
pub fn forward_engine_log(subsystem: &str, category: &str, level: i32, message: &str) {
    match engine_log_level(level) {
        Level::DEBUG => debug!(target: "olm", subsystem, category, "{}", message),
        Level::INFO => info!(target: "olm", subsystem, category, "{}", message),
        Level::ERROR => error!(target: "olm", subsystem, category, "{}", message),
        _ => warn!(target: "olm", subsystem, category, "{}", message),
    }
}
