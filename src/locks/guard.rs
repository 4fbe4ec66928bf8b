//! RAII guard for a held named mutex.

use super::named::NamedMutex;
use crate::error::Result;

/// Scoped hold on a [`NamedMutex`].
///
/// When dropped, the mutex is released once on behalf of the same identity.
/// If release fails during drop, a warning is logged but no panic occurs.
#[derive(Debug)]
pub struct NamedMutexGuard<'a> {
    mutex: &'a NamedMutex,
    who: String,
    released: bool,
}

impl<'a> NamedMutexGuard<'a> {
    pub(super) fn new(mutex: &'a NamedMutex, who: &str) -> Self {
        Self {
            mutex,
            who: who.to_string(),
            released: false,
        }
    }

    /// Identity the guard holds the lock for.
    pub fn who(&self) -> &str {
        &self.who
    }

    /// Name of the held lock.
    pub fn name(&self) -> &str {
        self.mutex.name()
    }

    /// Release before the guard goes out of scope, surfacing any error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.mutex.release(&self.who)
    }
}

impl Drop for NamedMutexGuard<'_> {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.mutex.release(&self.who)
        {
            tracing::warn!(lock = %self.mutex.name(), who = %self.who, "failed to release lock: {}", e);
        }
    }
}
