//! Type definitions and wrappers for secure data handling
//!
//! This module provides type-safe wrappers for sensitive data using the
//! secrecy crate to prevent accidental exposure in logs or debug output.

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Environment variable holding the olm client secret
pub const ENV_SECRET: &str = "BURROW_SECRET";

/// Environment variable holding the optional user session token
pub const ENV_USER_TOKEN: &str = "BURROW_USER_TOKEN";

/// Wrapper for the olm client secret
///
/// The secret authenticates this client to the control plane. It must never
/// be written to disk or logs, so it is only ever read from the environment.
#[derive(Clone, Debug)]
pub struct ClientSecret(Secret<String>);

impl ClientSecret {
    /// Create a new ClientSecret
    pub fn new(secret: String) -> Self {
        Self(Secret::new(secret))
    }

    /// Expose the secret value (use with caution!)
    ///
    /// This should only be called when building the engine start request.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<String> for ClientSecret {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

/// Wrapper for the user session token handed to the engine
#[derive(Clone, Debug)]
pub struct UserToken(Secret<String>);

impl UserToken {
    pub fn new(token: String) -> Self {
        Self(Secret::new(token))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

/// Credentials required to start a tunnel
#[derive(Clone, Debug)]
pub struct Credentials {
    pub secret: ClientSecret,
    pub user_token: Option<UserToken>,
}

impl Credentials {
    /// Read credentials from `BURROW_SECRET` and `BURROW_USER_TOKEN`
    ///
    /// Returns `None` if the secret is not set or empty.
    pub fn from_env() -> Option<Self> {
        let secret = std::env::var(ENV_SECRET).ok().filter(|s| !s.is_empty())?;
        let user_token = std::env::var(ENV_USER_TOKEN)
            .ok()
            .filter(|t| !t.is_empty())
            .map(UserToken::new);

        Some(Self {
            secret: ClientSecret::new(secret),
            user_token,
        })
    }
}

/// Engine power mode
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerMode {
    Low,
    #[default]
    Normal,
}

impl PowerMode {
    /// Value understood by the engine's `setPowerMode`
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerMode::Low => "low",
            PowerMode::Normal => "normal",
        }
    }
}

impl std::fmt::Display for PowerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(PowerMode::Low),
            "normal" => Ok(PowerMode::Normal),
            other => Err(format!("unknown power mode '{}', expected low or normal", other)),
        }
    }
}
