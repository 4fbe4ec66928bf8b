//! Tests for the locks subsystem.

use super::*;
use crate::error::SetupError;
use crate::events::{EventAction, read_events};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const POLL: Duration = Duration::from_millis(5);

fn mutex_in(dir: &TempDir, name: &str) -> NamedMutex {
    NamedMutex::new(dir.path(), name).with_poll_interval(POLL)
}

#[test]
fn test_lock_state_creation() {
    let state = LockState::new("scan 17");

    assert_eq!(state.holder, "scan 17");
    assert_eq!(state.count, 1);
    assert_eq!(state.pid, std::process::id());
    assert!(state.age().num_minutes() < 1);
}

#[test]
fn test_lock_state_age_string_and_staleness() {
    let mut state = LockState::new("a");
    assert!(state.age_string().ends_with('m'));
    assert!(!state.is_stale(120));

    state.acquired_at = Utc::now() - ChronoDuration::hours(2) - ChronoDuration::minutes(5);
    assert!(state.age_string().contains('h'));
    assert!(state.is_stale(120));

    state.acquired_at = Utc::now() - ChronoDuration::days(3);
    assert!(state.age_string().contains('d'));
}

#[test]
fn test_resource_group_names_round_trip() {
    for group in ResourceGroup::ALL {
        assert_eq!(group.as_str().parse::<ResourceGroup>().unwrap(), group);
    }
    assert!(matches!(
        "laser".parse::<ResourceGroup>(),
        Err(SetupError::InvalidInput(_))
    ));
}

#[test]
fn test_acquire_writes_state_and_release_removes_it() {
    let dir = TempDir::new().unwrap();
    let mutex = mutex_in(&dir, "bias");

    mutex.acquire("alice").unwrap();

    let state = mutex.state().unwrap().unwrap();
    assert_eq!(state.holder, "alice");
    assert_eq!(state.count, 1);
    assert!(mutex.state_path().exists());

    mutex.release("alice").unwrap();
    assert!(mutex.state().unwrap().is_none());
    assert!(!mutex.state_path().exists());
}

#[test]
fn test_reentrant_acquisition_requires_matching_releases() {
    let dir = TempDir::new().unwrap();
    let mutex = mutex_in(&dir, "tct");
    let other = mutex_in(&dir, "tct");

    mutex.acquire("alice").unwrap();
    mutex.acquire("alice").unwrap();
    assert_eq!(mutex.state().unwrap().unwrap().count, 2);

    mutex.release("alice").unwrap();
    assert_eq!(mutex.state().unwrap().unwrap().holder, "alice");
    assert!(!other.try_acquire("bob").unwrap());

    mutex.release("alice").unwrap();
    assert!(other.try_acquire("bob").unwrap());
    other.release("bob").unwrap();
}

#[test]
fn test_other_identity_waits_until_full_release() {
    let dir = TempDir::new().unwrap();
    let holder = mutex_in(&dir, "bias");
    holder.acquire("alice").unwrap();
    holder.acquire("alice").unwrap();

    let waiter = mutex_in(&dir, "bias");
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        waiter.acquire("bob").unwrap();
        tx.send(Instant::now()).unwrap();
        waiter.release("bob").unwrap();
    });

    thread::sleep(Duration::from_millis(100));
    holder.release("alice").unwrap();
    // Still held once by alice: bob must keep waiting.
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    thread::sleep(Duration::from_millis(50));
    let released_at = Instant::now();
    holder.release("alice").unwrap();

    let acquired_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(acquired_at >= released_at);
    handle.join().unwrap();
}

#[test]
fn test_racing_first_acquisition_has_single_winner() {
    let dir = TempDir::new().unwrap();
    let contenders = 8;
    let barrier = Arc::new(Barrier::new(contenders));
    let winners = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..contenders)
        .map(|i| {
            let mutex = mutex_in(&dir, "signal_acquisition");
            let barrier = Arc::clone(&barrier);
            let winners = Arc::clone(&winners);
            thread::spawn(move || {
                barrier.wait();
                if mutex.try_acquire(&format!("process {}", i)).unwrap() {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(winners.load(Ordering::SeqCst), 1);
}

#[test]
fn test_critical_sections_never_overlap() {
    let dir = TempDir::new().unwrap();
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let mutex = mutex_in(&dir, "temperature");
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            thread::spawn(move || {
                let who = format!("worker {}", i);
                for _ in 0..10 {
                    let _guard = mutex.hold(&who).unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(1));
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
}

#[test]
fn test_release_by_non_holder_is_protocol_error() {
    let dir = TempDir::new().unwrap();
    let mutex = mutex_in(&dir, "bias");
    mutex.acquire("alice").unwrap();

    let err = mutex.release("mallory").unwrap_err();
    assert!(matches!(err, SetupError::LockProtocol(_)));
    assert!(err.to_string().contains("held by 'alice'"));

    // State untouched
    let state = mutex.state().unwrap().unwrap();
    assert_eq!(state.holder, "alice");
    assert_eq!(state.count, 1);
}

#[test]
fn test_release_of_free_lock_is_protocol_error() {
    let dir = TempDir::new().unwrap();
    let mutex = mutex_in(&dir, "bias");

    assert!(matches!(
        mutex.release("alice"),
        Err(SetupError::LockProtocol(_))
    ));
}

#[test]
fn test_empty_identity_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mutex = mutex_in(&dir, "bias");

    assert!(matches!(mutex.acquire(""), Err(SetupError::InvalidInput(_))));
    assert!(matches!(mutex.try_acquire("  "), Err(SetupError::InvalidInput(_))));
}

#[test]
fn test_guard_releases_on_drop() {
    let dir = TempDir::new().unwrap();
    let mutex = mutex_in(&dir, "tct");

    {
        let guard = mutex.hold("alice").unwrap();
        assert_eq!(guard.who(), "alice");
        assert_eq!(guard.name(), "tct");
        assert!(mutex.state().unwrap().is_some());
    }

    assert!(mutex.state().unwrap().is_none());
}

#[test]
fn test_guard_releases_when_protected_code_fails() {
    let dir = TempDir::new().unwrap();
    let mutex = mutex_in(&dir, "bias");

    fn sequence(mutex: &NamedMutex) -> crate::error::Result<()> {
        let _guard = mutex.hold("alice")?;
        Err(SetupError::HardwareTimeout("no trigger".to_string()))
    }

    assert!(sequence(&mutex).is_err());
    let other = mutex_in(&dir, "bias");
    assert!(other.try_acquire("bob").unwrap());
    other.release("bob").unwrap();
}

#[test]
fn test_guard_releases_when_protected_code_panics() {
    let dir = TempDir::new().unwrap();
    let mutex = mutex_in(&dir, "bias");

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _guard = mutex.hold("alice").unwrap();
        panic!("instrument exploded");
    }));

    assert!(result.is_err());
    assert!(mutex_in(&dir, "bias").try_acquire("bob").unwrap());
}

#[test]
fn test_explicit_guard_release() {
    let dir = TempDir::new().unwrap();
    let mutex = mutex_in(&dir, "bias");

    let guard = mutex.hold("alice").unwrap();
    guard.release().unwrap();

    assert!(mutex.state().unwrap().is_none());
}

#[test]
fn test_resource_groups_are_independent() {
    let dir = TempDir::new().unwrap();
    let scan = ResourceLockSet::new(dir.path());
    let other = ResourceLockSet::new(dir.path());

    let _tct = scan.get(ResourceGroup::Tct).hold("scan").unwrap();

    for _ in 0..3 {
        assert!(other.get(ResourceGroup::Bias).try_acquire("iv curve").unwrap());
        other.get(ResourceGroup::Bias).release("iv curve").unwrap();
    }
    assert!(other
        .get(ResourceGroup::Temperature)
        .try_acquire("pid loop")
        .unwrap());
    assert!(!other.get(ResourceGroup::Tct).try_acquire("iv curve").unwrap());
}

#[test]
fn test_lock_set_names_match_groups() {
    let dir = TempDir::new().unwrap();
    let set = ResourceLockSet::new(dir.path());

    for group in ResourceGroup::ALL {
        assert_eq!(set.get(group).name(), group.as_str());
    }
}

#[test]
fn test_corrupt_state_file_is_fatal() {
    let dir = TempDir::new().unwrap();
    let mutex = mutex_in(&dir, "bias");
    std::fs::write(mutex.state_path(), "not json").unwrap();

    assert!(matches!(mutex.acquire("alice"), Err(SetupError::Lock(_))));
}

#[test]
fn test_unusable_lock_directory_is_fatal() {
    let dir = TempDir::new().unwrap();
    let not_a_dir = dir.path().join("locks");
    std::fs::write(&not_a_dir, "").unwrap();

    let mutex = NamedMutex::new(&not_a_dir, "bias");
    assert!(matches!(mutex.acquire("alice"), Err(SetupError::Lock(_))));
}

#[test]
fn test_list_locks_reports_holders() {
    let dir = TempDir::new().unwrap();
    let set = ResourceLockSet::new(dir.path());
    set.get(ResourceGroup::Tct).acquire("scan").unwrap();
    set.get(ResourceGroup::Bias).acquire("iv curve").unwrap();
    set.get(ResourceGroup::Bias).acquire("iv curve").unwrap();

    let locks = list_locks(dir.path(), 120).unwrap();

    assert_eq!(locks.len(), 2);
    assert_eq!(locks[0].name, "bias");
    assert_eq!(locks[0].group, Some(ResourceGroup::Bias));
    assert_eq!(locks[0].state.count, 2);
    assert_eq!(locks[1].name, "tct");
    assert!(!locks[1].is_stale);
    assert!(locks[1].to_string().contains("holder: scan"));
}

#[test]
fn test_list_locks_missing_directory() {
    let dir = TempDir::new().unwrap();
    let locks = list_locks(&dir.path().join("nope"), 120).unwrap();
    assert!(locks.is_empty());
}

#[test]
fn test_list_locks_flags_stale() {
    let dir = TempDir::new().unwrap();
    let mutex = mutex_in(&dir, "temperature");
    mutex.acquire("pid loop").unwrap();

    let mut state = mutex.state().unwrap().unwrap();
    state.acquired_at = Utc::now() - ChronoDuration::minutes(30);
    std::fs::write(mutex.state_path(), state.to_json().unwrap()).unwrap();

    let locks = list_locks(dir.path(), 10).unwrap();
    assert!(locks[0].is_stale);
    assert!(locks[0].to_string().contains("STALE"));
}

#[test]
fn test_clear_lock_frees_abandoned_lock() {
    let dir = TempDir::new().unwrap();
    let mutex = mutex_in(&dir, "tct");
    mutex.acquire("crashed scan").unwrap();

    let info = clear_lock(dir.path(), "tct", 120).unwrap();

    assert_eq!(info.state.holder, "crashed scan");
    assert_eq!(info.group, Some(ResourceGroup::Tct));
    assert!(mutex.try_acquire("next scan").unwrap());
}

#[test]
fn test_clear_lock_not_held() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        clear_lock(dir.path(), "bias", 120),
        Err(SetupError::InvalidInput(_))
    ));
}

#[test]
fn test_audit_log_records_only_outermost_transitions() {
    let dir = TempDir::new().unwrap();
    let events_path = dir.path().join("events.ndjson");
    let mutex = mutex_in(&dir, "bias").with_audit_log(&events_path);

    mutex.acquire("alice").unwrap();
    mutex.acquire("alice").unwrap();
    mutex.release("alice").unwrap();
    mutex.release("alice").unwrap();

    let events = read_events(&events_path).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].action, EventAction::Acquire);
    assert_eq!(events[0].actor, "alice");
    assert_eq!(events[0].lock.as_deref(), Some("bias"));
    assert_eq!(events[1].action, EventAction::Release);
}

#[test]
fn test_process_identity_contains_pid() {
    let identity = process_identity();
    assert!(identity.ends_with(&format!(":{}", std::process::id())));
    assert!(owner_string().contains('@'));
}
