//! Lock state stored in lock files.

use crate::error::{Result, SetupError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Holder of a named lock. Absence of the state file means the lock is free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockState {
    /// Caller identity currently holding the lock.
    pub holder: String,

    /// Reentrancy depth; always at least 1 while the file exists.
    pub count: u32,

    /// Process that performed the outermost acquisition.
    pub pid: u32,

    /// Host that performed the outermost acquisition.
    pub host: String,

    /// When the outermost acquisition happened.
    pub acquired_at: DateTime<Utc>,
}

impl LockState {
    /// Fresh state for a first acquisition by `holder`.
    pub fn new(holder: &str) -> Self {
        Self {
            holder: holder.to_string(),
            count: 1,
            pid: std::process::id(),
            host: host_string(),
            acquired_at: Utc::now(),
        }
    }

    /// Read the state file. `Ok(None)` means the lock is free.
    ///
    /// A file that exists but does not parse is an error: state files are
    /// only ever replaced atomically, so this means tampering or storage
    /// corruption and exclusivity can no longer be trusted.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SetupError::Lock(format!(
                    "failed to read lock file '{}': {}",
                    path.display(),
                    e
                )));
            }
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            SetupError::Lock(format!(
                "failed to parse lock file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Serialize lock state to JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SetupError::Lock(format!("failed to serialize lock state: {}", e)))
    }

    /// Time since the outermost acquisition.
    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.acquired_at)
    }

    /// Format the age as a human-readable string.
    pub fn age_string(&self) -> String {
        let age = self.age();
        let minutes = age.num_minutes();
        let hours = age.num_hours();
        let days = age.num_days();

        if days > 0 {
            format!("{}d {}h", days, hours % 24)
        } else if hours > 0 {
            format!("{}h {}m", hours, minutes % 60)
        } else {
            format!("{}m", minutes)
        }
    }

    /// Check if the lock is stale based on the given threshold in minutes.
    pub fn is_stale(&self, stale_minutes: u32) -> bool {
        self.age().num_minutes() > stale_minutes as i64
    }
}

fn host_string() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// `user@HOST` of the current process.
pub fn owner_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host_string())
}

/// A caller identity unique to this process: `user@HOST:pid`.
///
/// Every module of one script run shares it, which is what makes nested
/// acquisitions from different parts of the same script reentrant.
pub fn process_identity() -> String {
    format!("{}:{}", owner_string(), std::process::id())
}
