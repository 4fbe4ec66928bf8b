//! Filesystem utilities for the setup.
//!
//! Lock state files are read by every cooperating process, so they are only
//! ever replaced atomically.

pub mod atomic;

pub use atomic::atomic_write;
