//! Lock audit log.
//!
//! Lock transitions are appended to `events.ndjson` in the lock directory,
//! one JSON object per line, so that an operator can reconstruct who held
//! which resource group and when:
//! - `ts`: RFC3339 timestamp
//! - `action`: acquire, release, clear, disconnect_release, server_start
//! - `actor`: caller identity, or `user@HOST` for administrative actions
//! - `lock`: optional lock name
//! - `details`: freeform object with action-specific details
//!
//! Only outermost acquisitions and final releases are recorded; reentrant
//! nesting does not produce events.

use crate::error::{Result, SetupError};
use crate::locks::owner_string;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Actions that can be logged as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// A lock went from free to held.
    Acquire,
    /// A lock went from held to free.
    Release,
    /// A lock was force-cleared by an operator.
    Clear,
    /// The server released holds of a client whose connection closed.
    DisconnectRelease,
    /// The setup server started serving.
    ServerStart,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventAction::Acquire => write!(f, "acquire"),
            EventAction::Release => write!(f, "release"),
            EventAction::Clear => write!(f, "clear"),
            EventAction::DisconnectRelease => write!(f, "disconnect_release"),
            EventAction::ServerStart => write!(f, "server_start"),
        }
    }
}

/// An event record for the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// When the event occurred.
    pub ts: DateTime<Utc>,

    /// The action that was performed.
    pub action: EventAction,

    /// Who performed the action.
    pub actor: String,

    /// Lock the event refers to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<String>,

    /// Action-specific details.
    pub details: Value,
}

impl Event {
    /// Create a new event attributed to the current `user@HOST`.
    pub fn new(action: EventAction) -> Self {
        Self {
            ts: Utc::now(),
            action,
            actor: owner_string(),
            lock: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Attribute the event to a caller identity.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Set the lock name for this event.
    pub fn with_lock(mut self, lock: impl Into<String>) -> Self {
        self.lock = Some(lock.into());
        self
    }

    /// Set the details object for this event.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SetupError::Lock(format!("failed to serialize event to JSON: {}", e)))
    }
}

/// Append an event to the audit log at `path`, creating it if needed.
///
/// Each event is written with a single `write` on an append-mode handle, so
/// lines from concurrent processes do not interleave.
pub fn append_event(path: &Path, event: &Event) -> Result<()> {
    let mut line = event.to_ndjson_line()?;
    line.push('\n');

    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            SetupError::Lock(format!(
                "failed to create events directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            SetupError::Lock(format!(
                "failed to open events file '{}': {}",
                path.display(),
                e
            ))
        })?;

    file.write_all(line.as_bytes()).map_err(|e| {
        SetupError::Lock(format!(
            "failed to write event to '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Append an event, logging instead of failing.
///
/// The audit trail is advisory: a full disk must not abort a hardware
/// sequence that already holds its lock.
pub fn record(path: &Path, event: &Event) {
    if let Err(e) = append_event(path, event) {
        tracing::warn!(action = %event.action, "failed to record lock event: {}", e);
    }
}

/// Read all events from the audit log. A missing file yields no events.
pub fn read_events(path: &Path) -> Result<Vec<Event>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        SetupError::Lock(format!(
            "failed to read events file '{}': {}",
            path.display(),
            e
        ))
    })?;

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| {
                SetupError::Lock(format!("failed to parse event line '{}': {}", line, e))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_event_creation() {
        let event = Event::new(EventAction::ServerStart);

        assert_eq!(event.action, EventAction::ServerStart);
        assert!(event.actor.contains('@'));
        assert!(event.lock.is_none());
        let age = Utc::now().signed_duration_since(event.ts);
        assert!(age.num_minutes() < 1);
    }

    #[test]
    fn test_event_builders() {
        let event = Event::new(EventAction::Acquire)
            .with_actor("iv curve 4242")
            .with_lock("bias")
            .with_details(json!({"pid": 4242}));

        assert_eq!(event.actor, "iv curve 4242");
        assert_eq!(event.lock.as_deref(), Some("bias"));
        assert_eq!(event.details["pid"], 4242);
    }

    #[test]
    fn test_event_serialization_is_single_line() {
        let event = Event::new(EventAction::DisconnectRelease).with_lock("tct");
        let json_line = event.to_ndjson_line().unwrap();

        assert!(!json_line.contains('\n'));
        assert!(json_line.contains("\"disconnect_release\""));
        let parsed: Event = serde_json::from_str(&json_line).unwrap();
        assert_eq!(parsed.lock.as_deref(), Some("tct"));
    }

    #[test]
    fn test_event_without_lock_omits_field() {
        let json_line = Event::new(EventAction::ServerStart).to_ndjson_line().unwrap();
        let parsed: Value = serde_json::from_str(&json_line).unwrap();
        assert!(parsed.get("lock").is_none());
    }

    #[test]
    fn test_append_and_read_events() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("locks").join("events.ndjson");

        assert!(read_events(&path).unwrap().is_empty());

        append_event(&path, &Event::new(EventAction::Acquire).with_lock("bias")).unwrap();
        append_event(&path, &Event::new(EventAction::Release).with_lock("bias")).unwrap();

        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, EventAction::Acquire);
        assert_eq!(events[1].action, EventAction::Release);
    }

    #[test]
    fn test_record_swallows_write_failures() {
        let temp_dir = TempDir::new().unwrap();
        // A directory where the file should be makes the open fail.
        let path = temp_dir.path().join("events.ndjson");
        fs::create_dir_all(&path).unwrap();

        record(&path, &Event::new(EventAction::Clear));
    }
}
