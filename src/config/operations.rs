//! Config loading, validation, and utility operations.

use super::model::Config;
use crate::error::{Result, SetupError};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            SetupError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Load config from a YAML file, falling back to defaults if it does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to an empty map.
        let config: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| SetupError::Config(format!("failed to parse config YAML: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| SetupError::Config(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `address` must parse as a socket address
    /// - `auth_token` must be non-empty
    /// - `call_timeout_secs`, `lock_poll_interval_ms` and `lock_stale_minutes` must be positive
    /// - `trigger_timeout_ms`, when set, must be positive
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.auth_token.is_empty() {
            return Err(SetupError::Config(
                "config validation failed: auth_token must be non-empty".to_string(),
            ));
        }

        if self.call_timeout_secs == 0 {
            return Err(SetupError::Config(
                "config validation failed: call_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.lock_poll_interval_ms == 0 {
            return Err(SetupError::Config(
                "config validation failed: lock_poll_interval_ms must be greater than 0"
                    .to_string(),
            ));
        }

        if self.lock_stale_minutes == 0 {
            return Err(SetupError::Config(
                "config validation failed: lock_stale_minutes must be greater than 0".to_string(),
            ));
        }

        if self.instruments.trigger_timeout_ms == Some(0) {
            return Err(SetupError::Config(
                "config validation failed: instruments.trigger_timeout_ms must be greater than 0"
                    .to_string(),
            ));
        }

        let call_timeout = self.call_timeout();
        if call_timeout <= self.instruments.trigger_timeout() {
            return Err(SetupError::Config(format!(
                "config validation failed: call_timeout_secs ({}) must exceed the trigger timeout ({:?})",
                self.call_timeout_secs,
                self.instruments.trigger_timeout()
            )));
        }

        let ramp = self.instruments.bias_ramp_timeout() + self.instruments.bias_output_settle();
        if call_timeout <= ramp {
            return Err(SetupError::Config(format!(
                "config validation failed: call_timeout_secs ({}) must exceed the bias ramp timeout plus settle time ({:?})",
                self.call_timeout_secs, ramp
            )));
        }

        let limit = self.instruments.bias_voltage_limit;
        if !limit.is_finite() || limit <= 0.0 {
            return Err(SetupError::Config(format!(
                "config validation failed: instruments.bias_voltage_limit must be a positive number, got {}",
                limit
            )));
        }

        Ok(())
    }

    /// Parsed transport address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.address.parse().map_err(|e| {
            SetupError::Config(format!(
                "config validation failed: invalid address '{}': {}",
                self.address, e
            ))
        })
    }

    /// Interval between lock acquisition attempts.
    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    /// Transport timeout for remote calls.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}
