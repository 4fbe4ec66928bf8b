//! The setup configuration struct and its defaults.

use super::types::InstrumentsConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the TCT setup server and its clients.
///
/// Every process on the host reads the same file, so they agree on the
/// endpoint, the token and the lock directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Transport settings
    // =========================================================================
    /// Address the setup server listens on and clients connect to.
    #[serde(default = "default_address")]
    pub address: String,

    /// Shared handshake token. Not access control, only compatibility.
    #[serde(default = "default_auth_token")]
    pub auth_token: String,

    /// Deadline in seconds for read-only remote calls.
    ///
    /// Lock acquisitions and identity-aware calls wait without a deadline,
    /// since they may queue behind another client's hold.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    // =========================================================================
    // Lock settings
    // =========================================================================
    /// Directory holding the named lock files (default: `~/.tct-setup/locks`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_dir: Option<PathBuf>,

    /// Milliseconds between attempts while waiting for a held lock.
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,

    /// Minutes after which a held lock is reported as stale.
    #[serde(default = "default_lock_stale_minutes")]
    pub lock_stale_minutes: u32,

    /// Whether lock transitions are appended to the audit log.
    #[serde(default = "default_true")]
    pub audit_log: bool,

    /// Whether the server deploys the named-lock variant of the setup.
    #[serde(default = "default_true")]
    pub named_locks: bool,

    // =========================================================================
    // Hardware
    // =========================================================================
    /// Instruments present in this deployment.
    #[serde(default)]
    pub instruments: InstrumentsConfig,
}

fn default_address() -> String {
    "127.0.0.1:50000".to_string()
}
fn default_auth_token() -> String {
    "abracadabra".to_string()
}
fn default_call_timeout_secs() -> u64 {
    90
}
fn default_lock_poll_interval_ms() -> u64 {
    50
}
fn default_lock_stale_minutes() -> u32 {
    120
}
fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            auth_token: default_auth_token(),
            call_timeout_secs: default_call_timeout_secs(),
            lock_dir: None,
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
            lock_stale_minutes: default_lock_stale_minutes(),
            audit_log: default_true(),
            named_locks: default_true(),
            instruments: InstrumentsConfig::default(),
        }
    }
}
