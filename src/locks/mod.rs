//! Cross-process locking for the setup's resource groups.
//!
//! This module implements the named, reentrant mutex that arbitrates the
//! hardware between independent scan and control processes on one host:
//! - `bias` (`bias.lock`)
//! - `signal_acquisition` (`signal_acquisition.lock`)
//! - `tct` (`tct.lock`, stages and laser)
//! - `temperature` (`temperature.lock`, Peltier cooling)
//!
//! # Lock Files
//!
//! Lock files live in the lock directory (default `~/.tct-setup/locks/`).
//! A `<name>.lock` file exists only while the lock is held and contains JSON
//! state:
//! - `holder`: the caller identity holding the lock
//! - `count`: reentrancy depth
//! - `pid`, `host`: where the outermost acquisition came from
//! - `acquired_at`: RFC3339 timestamp
//!
//! Every check-then-set runs under an exclusive `flock` on `<name>.guard`,
//! so two processes racing for a free lock cannot both win.
//!
//! # Stale Locks
//!
//! There is no lease: a lock left behind by a crashed process stays held
//! until an operator clears it (`tct-setup lock clear <name> --force`).
//!
//! # RAII Guards
//!
//! [`NamedMutex::hold`] returns a guard that releases on drop, including
//! during unwinding and on early return through `?`.

mod guard;
mod metadata;
mod named;
mod operations;
mod set;
mod types;

#[cfg(test)]
mod tests;

// Re-export public API
pub use guard::NamedMutexGuard;
pub use metadata::{LockState, owner_string, process_identity};
pub use named::{DEFAULT_POLL_INTERVAL, NamedMutex};
pub use operations::{clear_lock, list_locks};
pub use set::ResourceLockSet;
pub use types::{LockInfo, ResourceGroup};
