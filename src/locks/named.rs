//! Reentrant mutual exclusion across independent processes.

use super::guard::NamedMutexGuard;
use super::metadata::LockState;
use crate::error::{Result, SetupError};
use crate::events::{self, Event, EventAction};
use crate::fs::atomic_write;
use fs2::FileExt;
use serde_json::json;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Default interval between attempts while a lock is held by someone else.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A named, reentrant mutex shared by every process pointing at the same directory.
///
/// The lock is keyed by caller identity, not by thread or process: the same
/// identity may enter any number of times and must leave as many times.
/// Each name uses two files in the directory:
/// - `<name>.lock`: JSON [`LockState`], present only while held
/// - `<name>.guard`: empty file carrying an advisory `flock` that serializes
///   every read-modify-write of the state file
///
/// Waiting has no timeout; use [`NamedMutex::try_acquire`] to build one.
#[derive(Debug, Clone)]
pub struct NamedMutex {
    name: String,
    dir: PathBuf,
    poll_interval: Duration,
    audit_log: Option<PathBuf>,
}

/// Outcome of one attempt under the guard.
enum Attempt {
    Acquired,
    HeldBy(String),
}

impl NamedMutex {
    /// Create a handle for the mutex `name` coordinated through `dir`.
    ///
    /// Nothing touches the filesystem until the first operation.
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            audit_log: None,
        }
    }

    /// Set the interval between attempts while waiting.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Record outermost acquisitions and final releases in an audit log.
    pub fn with_audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log = Some(path.into());
        self
    }

    /// The lock name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the state file.
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(format!("{}.lock", self.name))
    }

    fn guard_path(&self) -> PathBuf {
        self.dir.join(format!("{}.guard", self.name))
    }

    /// Block until no other identity holds the lock, then take it.
    ///
    /// If `who` already holds it, the reentrancy count is incremented and the
    /// call returns immediately.
    pub fn acquire(&self, who: &str) -> Result<()> {
        validate_identity(who)?;

        let mut waiting_on: Option<String> = None;
        loop {
            match self.attempt(who)? {
                Attempt::Acquired => {
                    if waiting_on.is_some() {
                        tracing::debug!(lock = %self.name, who, "acquired after waiting");
                    }
                    return Ok(());
                }
                Attempt::HeldBy(holder) => {
                    if waiting_on.as_deref() != Some(holder.as_str()) {
                        tracing::debug!(lock = %self.name, who, holder = %holder, "waiting for lock");
                        waiting_on = Some(holder);
                    }
                    thread::sleep(self.poll_interval);
                }
            }
        }
    }

    /// Make one attempt to take the lock without waiting.
    ///
    /// Returns `Ok(false)` if another identity holds it.
    pub fn try_acquire(&self, who: &str) -> Result<bool> {
        validate_identity(who)?;
        Ok(matches!(self.attempt(who)?, Attempt::Acquired))
    }

    /// Leave the lock once. The last release frees it for other identities.
    ///
    /// Releasing a lock `who` does not hold is a [`SetupError::LockProtocol`]
    /// error and leaves the state untouched.
    pub fn release(&self, who: &str) -> Result<()> {
        validate_identity(who)?;

        let freed = self.with_guard(|| {
            let path = self.state_path();
            let mut state = match LockState::read(&path)? {
                Some(state) if state.holder == who => state,
                Some(state) => {
                    return Err(SetupError::LockProtocol(format!(
                        "'{}' tried to release lock '{}' held by '{}'",
                        who, self.name, state.holder
                    )));
                }
                None => {
                    return Err(SetupError::LockProtocol(format!(
                        "'{}' tried to release lock '{}' which is not held",
                        who, self.name
                    )));
                }
            };

            if state.count > 1 {
                state.count -= 1;
                atomic_write(&path, state.to_json()?.as_bytes())?;
                return Ok(None);
            }

            fs::remove_file(&path).map_err(|e| {
                SetupError::Lock(format!(
                    "failed to remove lock file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            Ok(Some(state))
        })?;

        if let Some(state) = freed {
            tracing::debug!(lock = %self.name, who, "released");
            self.audit(
                Event::new(EventAction::Release)
                    .with_actor(who)
                    .with_details(json!({ "held_for": state.age_string() })),
            );
        }
        Ok(())
    }

    /// Acquire the lock for the lifetime of the returned guard.
    pub fn hold(&self, who: &str) -> Result<NamedMutexGuard<'_>> {
        self.acquire(who)?;
        Ok(NamedMutexGuard::new(self, who))
    }

    /// Current holder, or `None` if the lock is free.
    pub fn state(&self) -> Result<Option<LockState>> {
        LockState::read(self.state_path())
    }

    /// Remove the lock regardless of holder and return what was removed.
    ///
    /// Only for recovering a lock left behind by a crashed process.
    pub fn force_clear(&self) -> Result<Option<LockState>> {
        self.with_guard(|| {
            let path = self.state_path();
            let state = LockState::read(&path)?;
            if state.is_some() {
                fs::remove_file(&path).map_err(|e| {
                    SetupError::Lock(format!(
                        "failed to clear lock file '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
            }
            Ok(state)
        })
    }

    fn attempt(&self, who: &str) -> Result<Attempt> {
        let (attempt, outermost) = self.with_guard(|| {
            let path = self.state_path();
            match LockState::read(&path)? {
                None => {
                    atomic_write(&path, LockState::new(who).to_json()?.as_bytes())?;
                    Ok((Attempt::Acquired, true))
                }
                Some(mut state) if state.holder == who => {
                    state.count += 1;
                    atomic_write(&path, state.to_json()?.as_bytes())?;
                    Ok((Attempt::Acquired, false))
                }
                Some(state) => Ok((Attempt::HeldBy(state.holder), false)),
            }
        })?;

        if outermost {
            tracing::debug!(lock = %self.name, who, "acquired");
            self.audit(Event::new(EventAction::Acquire).with_actor(who));
        }
        Ok(attempt)
    }

    /// Run `f` while holding the exclusive advisory lock on the guard file.
    ///
    /// The flock is dropped with the file handle, including when the process
    /// dies, so the guard itself can never be left stuck.
    fn with_guard<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let guard_file = self.open_guard_file()?;
        FileExt::lock_exclusive(&guard_file).map_err(|e| {
            SetupError::Lock(format!(
                "failed to lock '{}': {}",
                self.guard_path().display(),
                e
            ))
        })?;

        let result = f();
        drop(guard_file);
        result
    }

    fn open_guard_file(&self) -> Result<File> {
        ensure_dir(&self.dir)?;
        let path = self.guard_path();
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                SetupError::Lock(format!(
                    "failed to open lock guard '{}': {}",
                    path.display(),
                    e
                ))
            })
    }

    fn audit(&self, event: Event) {
        if let Some(path) = &self.audit_log {
            events::record(path, &event.with_lock(self.name.clone()));
        }
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| {
        SetupError::Lock(format!(
            "failed to create lock directory '{}': {}",
            dir.display(),
            e
        ))
    })
}

fn validate_identity(who: &str) -> Result<()> {
    if who.trim().is_empty() {
        return Err(SetupError::InvalidInput(
            "caller identity must not be empty".to_string(),
        ));
    }
    Ok(())
}
