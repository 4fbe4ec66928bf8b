//! Lock listing and clearing for operators.

use super::metadata::LockState;
use super::named::NamedMutex;
use super::types::{LockInfo, ResourceGroup};
use crate::error::{Result, SetupError};
use std::fs;
use std::path::Path;

/// List every held lock in `lock_dir`, sorted by name.
///
/// Lock files that cannot be parsed are skipped; a missing directory means
/// nothing is held.
pub fn list_locks(lock_dir: &Path, stale_minutes: u32) -> Result<Vec<LockInfo>> {
    let mut locks = Vec::new();

    if !lock_dir.exists() {
        return Ok(locks);
    }

    let entries = fs::read_dir(lock_dir).map_err(|e| {
        SetupError::Lock(format!(
            "failed to read lock directory '{}': {}",
            lock_dir.display(),
            e
        ))
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| {
            SetupError::Lock(format!("failed to read lock directory entry: {}", e))
        })?;

        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("lock") {
            continue;
        }

        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };

        // Released between read_dir and read, or unreadable.
        let state = match LockState::read(&path) {
            Ok(Some(state)) => state,
            Ok(None) | Err(_) => continue,
        };

        let is_stale = state.is_stale(stale_minutes);
        locks.push(LockInfo {
            group: name.parse::<ResourceGroup>().ok(),
            path,
            name,
            state,
            is_stale,
        });
    }

    locks.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(locks)
}

/// Force-clear the lock `name`, whoever holds it.
///
/// The caller is responsible for making sure the holder is really gone
/// (e.g. requiring `--force`). Returns what was cleared for audit purposes.
pub fn clear_lock(lock_dir: &Path, name: &str, stale_minutes: u32) -> Result<LockInfo> {
    let mutex = NamedMutex::new(lock_dir, name);

    let state = mutex.force_clear()?.ok_or_else(|| {
        SetupError::InvalidInput(format!(
            "lock '{}' is not held (no file at {})",
            name,
            mutex.state_path().display()
        ))
    })?;

    Ok(LockInfo {
        path: mutex.state_path(),
        name: name.to_string(),
        group: name.parse::<ResourceGroup>().ok(),
        is_stale: state.is_stale(stale_minutes),
        state,
    })
}
