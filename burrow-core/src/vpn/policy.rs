//! Polling cadence for the tunnel session
//!
//! Controls how often the engine status channel and the network settings
//! version are queried, and how long path changes are debounced.

use std::time::Duration;

/// Configuration for the session's periodic tasks
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PollingPolicy {
    /// Interval between engine status queries, in milliseconds
    #[serde(default = "default_status_interval")]
    pub status_interval_ms: u64,

    /// Interval between network settings version checks, in milliseconds
    #[serde(default = "default_settings_interval")]
    pub settings_interval_ms: u64,

    /// Quiet period before a path change triggers a rebind, in milliseconds
    #[serde(default = "default_rebind_debounce")]
    pub rebind_debounce_ms: u64,

    /// Engine status endpoint (HTTP)
    #[serde(default = "default_status_endpoint")]
    pub status_endpoint: String,

    /// Timeout for a single status query, in milliseconds
    #[serde(default = "default_status_timeout")]
    pub status_timeout_ms: u64,
}

fn default_status_interval() -> u64 {
    1000
}
fn default_settings_interval() -> u64 {
    1000
}
fn default_rebind_debounce() -> u64 {
    2500
}
fn default_status_endpoint() -> String {
    "http://127.0.0.1:9452/status".to_string()
}
fn default_status_timeout() -> u64 {
    2000
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            status_interval_ms: default_status_interval(),
            settings_interval_ms: default_settings_interval(),
            rebind_debounce_ms: default_rebind_debounce(),
            status_endpoint: default_status_endpoint(),
            status_timeout_ms: default_status_timeout(),
        }
    }
}

impl PollingPolicy {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn settings_interval(&self) -> Duration {
        Duration::from_millis(self.settings_interval_ms)
    }

    pub fn rebind_debounce(&self) -> Duration {
        Duration::from_millis(self.rebind_debounce_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    /// Validate the entire policy
    ///
    /// # Returns
    ///
    /// * `Ok(())` if all fields are valid
    /// * `Err(PolicyValidationError)` with the first validation error encountered
    pub fn validate(&self) -> Result<(), PolicyValidationError> {
        if !(100..=60_000).contains(&self.status_interval_ms) {
            return Err(PolicyValidationError::InvalidStatusInterval(
                self.status_interval_ms,
            ));
        }
        if !(100..=60_000).contains(&self.settings_interval_ms) {
            return Err(PolicyValidationError::InvalidSettingsInterval(
                self.settings_interval_ms,
            ));
        }
        if self.rebind_debounce_ms > 60_000 {
            return Err(PolicyValidationError::InvalidRebindDebounce(
                self.rebind_debounce_ms,
            ));
        }
        if !(100..=30_000).contains(&self.status_timeout_ms) {
            return Err(PolicyValidationError::InvalidStatusTimeout(
                self.status_timeout_ms,
            ));
        }
        self.validate_status_endpoint()
    }

    /// Validate status_endpoint is a valid HTTP URL
    fn validate_status_endpoint(&self) -> Result<(), PolicyValidationError> {
        use url::Url;

        match Url::parse(&self.status_endpoint) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(()),
                scheme => Err(PolicyValidationError::InvalidStatusEndpoint(format!(
                    "URL scheme must be http or https, got: {}",
                    scheme
                ))),
            },
            Err(e) => Err(PolicyValidationError::InvalidStatusEndpoint(format!(
                "Failed to parse URL: {}",
                e
            ))),
        }
    }
}

/// Validation errors for PollingPolicy
#[derive(Debug, thiserror::Error)]
pub enum PolicyValidationError {
    #[error("status_interval_ms must be between 100 and 60000, got: {0}")]
    InvalidStatusInterval(u64),

    #[error("settings_interval_ms must be between 100 and 60000, got: {0}")]
    InvalidSettingsInterval(u64),

    #[error("rebind_debounce_ms must be at most 60000, got: {0}")]
    InvalidRebindDebounce(u64),

    #[error("status_timeout_ms must be between 100 and 30000, got: {0}")]
    InvalidStatusTimeout(u64),

    #[error("status_endpoint must be a valid HTTP/HTTPS URL: {0}")]
    InvalidStatusEndpoint(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = PollingPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.rebind_debounce(), Duration::from_millis(2500));
    }

    #[test]
    fn test_rejects_busy_polling() {
        let policy = PollingPolicy {
            status_interval_ms: 10,
            ..PollingPolicy::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(PolicyValidationError::InvalidStatusInterval(10))
        ));
    }

    #[test]
    fn test_rejects_non_http_endpoint() {
        let policy = PollingPolicy {
            status_endpoint: "unix:///var/run/olm.sock".to_string(),
            ..PollingPolicy::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }
}
