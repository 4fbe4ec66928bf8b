//! Filesystem context resolution for the setup.
//!
//! Every cooperating process must agree on where the configuration and the
//! named lock files live. By default that is `~/.tct-setup/`; the
//! `TCT_SETUP_HOME` environment variable replaces the home directory.

use crate::config::Config;
use crate::error::{Result, SetupError};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable overriding the home directory used for defaults.
pub const HOME_ENV_VAR: &str = "TCT_SETUP_HOME";

/// Name of the state directory inside the home directory.
pub const STATE_DIR_NAME: &str = ".tct-setup";

/// Resolved paths shared by all processes of one setup.
#[derive(Debug, Clone)]
pub struct SetupContext {
    /// Absolute path to the state directory (default: `~/.tct-setup/`).
    pub state_dir: PathBuf,

    /// Absolute path to the configuration file.
    pub config_path: PathBuf,

    /// Absolute path to the directory holding named lock files.
    pub lock_dir: PathBuf,
}

impl SetupContext {
    /// Resolve the context from `TCT_SETUP_HOME` or the user's home directory.
    pub fn resolve() -> Result<Self> {
        let home = match env::var_os(HOME_ENV_VAR) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir().ok_or_else(|| {
                SetupError::Config(format!(
                    "cannot determine home directory; set {} explicitly",
                    HOME_ENV_VAR
                ))
            })?,
        };

        Ok(Self::resolve_from(home))
    }

    /// Resolve the context below a specific home directory.
    pub fn resolve_from<P: AsRef<Path>>(home: P) -> Self {
        let state_dir = home.as_ref().join(STATE_DIR_NAME);
        Self {
            config_path: state_dir.join("config.yaml"),
            lock_dir: state_dir.join("locks"),
            state_dir,
        }
    }

    /// Apply the lock directory override from a loaded config.
    pub fn with_config(mut self, config: &Config) -> Self {
        if let Some(lock_dir) = &config.lock_dir {
            self.lock_dir = lock_dir.clone();
        }
        self
    }

    /// Load the config file (defaults if absent) and apply its overrides.
    pub fn load_config(self) -> Result<(Self, Config)> {
        let config = Config::load_or_default(&self.config_path)?;
        Ok((self.with_config(&config), config))
    }

    /// Path of the lock audit log.
    pub fn events_path(&self) -> PathBuf {
        self.lock_dir.join("events.ndjson")
    }
}
