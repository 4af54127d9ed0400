//! Change events and watch degradation reports
//!
//! A watch produces two kinds of output: [`Event`]s describing a change to an
//! entry below the watch root, and [`ErrorReport`]s describing the watch itself
//! degrading (overflow, abort, lost access). Consumers keep them apart.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier assigned to a watch by whoever starts it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorId(pub u64);

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened to an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    /// Entry was created
    Added,
    /// Entry was deleted
    Removed,
    /// Entry content or metadata changed
    Touched,
    /// Entry was renamed; the event carries the previous name
    Renamed,
    /// The OS reported an action code we do not know
    Unknown,
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventAction::Added => "added",
            EventAction::Removed => "removed",
            EventAction::Touched => "touched",
            EventAction::Renamed => "renamed",
            EventAction::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Type of the entry an event refers to, probed when the event is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    /// The entry could not be probed (already gone, permission denied, ...)
    Unknown,
}

/// A single change below the watch root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Watch that produced the event
    pub id: MonitorId,

    /// Wall-clock time the event was built (ms since the Unix epoch)
    pub timestamp_ms: u64,

    pub action: EventAction,

    /// Name relative to the watch root
    pub name: String,

    /// Name before the rename, only set for [`EventAction::Renamed`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_name: Option<String>,

    pub entry: EntryKind,
}

impl Event {
    /// Create a non-rename event stamped with the current time
    pub fn new(id: MonitorId, action: EventAction, name: impl Into<String>, entry: EntryKind) -> Self {
        Self {
            id,
            timestamp_ms: current_timestamp_ms(),
            action,
            name: name.into(),
            previous_name: None,
            entry,
        }
    }

    /// Create a rename event from `previous` to `name`
    pub fn renamed(
        id: MonitorId,
        previous: impl Into<String>,
        name: impl Into<String>,
        entry: EntryKind,
    ) -> Self {
        Self {
            id,
            timestamp_ms: current_timestamp_ms(),
            action: EventAction::Renamed,
            name: name.into(),
            previous_name: Some(previous.into()),
            entry,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.entry == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.entry == EntryKind::File
    }
}

/// Ways a watch can degrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "lowercase")]
pub enum EventError {
    /// The watched directory cannot be opened or monitored
    #[error("cannot access the watched directory")]
    Access,

    /// The OS refused to arm a notification read
    #[error("notification read could not be armed")]
    CannotStart,

    /// The pending read was cancelled, normally because the watch is stopping
    #[error("notification read was aborted")]
    Aborted,

    /// The kernel buffer filled up and pending changes were discarded
    #[error("notification buffer overflowed, changes were lost")]
    Overflow,

    /// Allocation or decoding failed while handling a completion
    #[error("out of memory while handling notifications")]
    Memory,
}

/// An [`EventError`] tagged with the watch it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub id: MonitorId,
    pub timestamp_ms: u64,
    pub error: EventError,
}

impl ErrorReport {
    pub fn new(id: MonitorId, error: EventError) -> Self {
        Self {
            id,
            timestamp_ms: current_timestamp_ms(),
            error,
        }
    }
}

/// Milliseconds since the Unix epoch, 0 if the clock is before it
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
