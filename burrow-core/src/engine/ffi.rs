//! Binding to the olm engine archive
//!
//! Every exported function returns a `malloc`ed C string that the caller
//! must free.

use super::log::forward_engine_log;
use super::{interpret_reply, InitRequest, TunnelEngine};
use crate::error::EngineError;
use crate::types::PowerMode;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_long};
use tracing::{debug, info};

#[allow(non_snake_case)]
extern "C" {
    fn initOlm(config_json: *const c_char) -> *mut c_char;
    fn startTunnel(fd: c_int, config_json: *const c_char) -> *mut c_char;
    fn stopTunnel() -> *mut c_char;
    fn getNetworkSettingsVersion() -> c_long;
    fn getNetworkSettings() -> *mut c_char;
    fn setPowerMode(mode: *const c_char) -> *mut c_char;
    fn rebindSocket() -> *mut c_char;
}

/// Log callback the engine archive links against
///
/// # Safety
///
/// Each pointer must be null or a NUL-terminated string valid for the
/// duration of the call.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn goLogToOSLog(
    subsystem: *const c_char,
    category: *const c_char,
    level: c_int,
    message: *const c_char,
) {
    forward_engine_log(
        &borrow_string(subsystem),
        &borrow_string(category),
        level,
        &borrow_string(message),
    );
}

/// Copy a string the engine keeps ownership of
///
/// # Safety
///
/// `ptr` must be null or a NUL-terminated string.
unsafe fn borrow_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

/// Copy an engine-owned string and release it
///
/// # Safety
///
/// `ptr` must be null or a NUL-terminated string allocated with `malloc`
/// that is not used afterwards.
unsafe fn take_string(ptr: *mut c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let value = CStr::from_ptr(ptr).to_string_lossy().into_owned();
    libc::free(ptr.cast());
    value
}

fn to_cstring(value: &str) -> Result<CString, EngineError> {
    CString::new(value).map_err(|_| EngineError::InvalidConfig {
        reason: "argument contains an interior NUL byte".to_string(),
    })
}

/// Error reply for arguments that cannot cross the boundary
fn reject(error: EngineError) -> String {
    format!("Error: {}", error)
}

/// The in-process olm engine
///
/// The engine keeps global state, so only one instance should exist per
/// process.
#[derive(Debug)]
pub struct OlmEngine {
    _initialized: (),
}

impl OlmEngine {
    /// Initialise the engine
    #[tracing::instrument(skip(request), fields(log_level = %request.log_level))]
    pub fn init(request: &InitRequest) -> Result<Self, EngineError> {
        let json = to_cstring(&request.to_json()?)?;
        // SAFETY: `json` outlives the call and the reply is freed by take_string
        let reply = unsafe { take_string(initOlm(json.as_ptr())) };
        let message = interpret_reply(&reply)?;
        info!(%message, "Engine initialized");
        Ok(Self { _initialized: () })
    }
}

impl TunnelEngine for OlmEngine {
    fn start_tunnel(&self, fd: i32, config_json: &str) -> String {
        let json = match to_cstring(config_json) {
            Ok(json) => json,
            Err(e) => return reject(e),
        };
        debug!(fd, "Starting engine tunnel");
        // SAFETY: `json` outlives the call and the reply is freed by take_string
        unsafe { take_string(startTunnel(fd, json.as_ptr())) }
    }

    fn stop_tunnel(&self) -> String {
        // SAFETY: the reply is freed by take_string
        unsafe { take_string(stopTunnel()) }
    }

    fn network_settings_version(&self) -> i64 {
        // SAFETY: no arguments, plain integer result
        i64::from(unsafe { getNetworkSettingsVersion() })
    }

    fn network_settings(&self) -> String {
        // SAFETY: the reply is freed by take_string
        unsafe { take_string(getNetworkSettings()) }
    }

    fn set_power_mode(&self, mode: PowerMode) -> String {
        let mode = match to_cstring(mode.as_str()) {
            Ok(mode) => mode,
            Err(e) => return reject(e),
        };
        // SAFETY: `mode` outlives the call and the reply is freed by take_string
        unsafe { take_string(setPowerMode(mode.as_ptr())) }
    }

    fn rebind_socket(&self) -> String {
        // SAFETY: the reply is freed by take_string
        unsafe { take_string(rebindSocket()) }
    }
}
