//! Log entries replicated from the master to every replica.

use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;

/// How log listings render the creation time, in the local time zone.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Kind of mutation carried by a [`LogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Write,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Write => f.write_str("WRITE"),
            Operation::Delete => f.write_str("DELETE"),
        }
    }
}

/// One mutation accepted by the master.
///
/// Entries are created only by the master, inside its write lock, and are never
/// modified afterwards. Ids start at 1 and grow by one per accepted mutation, so
/// two entries compare equal exactly when they share an id.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    id: u64,
    key: String,
    value: String,
    operation: Operation,
    timestamp: u64,
}

impl LogEntry {
    /// Builds a write entry stamped with the current wall-clock time.
    pub fn write(id: u64, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(id, key.into(), value.into(), Operation::Write)
    }

    /// Builds a delete entry. Deletes carry an empty value.
    pub fn delete(id: u64, key: impl Into<String>) -> Self {
        Self::new(id, key.into(), String::new(), Operation::Delete)
    }

    fn new(id: u64, key: String, value: String, operation: Operation) -> Self {
        Self {
            id,
            key,
            value,
            operation,
            timestamp: now_millis(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Milliseconds since the Unix epoch at which the master created the entry.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The creation time in the local time zone, or `None` if the stored
    /// milliseconds fall outside what chrono can represent.
    pub fn created_at(&self) -> Option<DateTime<Local>> {
        let millis = i64::try_from(self.timestamp).ok()?;
        Local.timestamp_millis_opt(millis).single()
    }

    fn rendered_time(&self) -> String {
        match self.created_at() {
            Some(time) => time.format(TIMESTAMP_FORMAT).to_string(),
            None => format!("{}ms", self.timestamp),
        }
    }

    pub fn is_delete(&self) -> bool {
        self.operation == Operation::Delete
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation {
            Operation::Write => write!(
                f,
                "#{} {} key='{}' value='{}' at {}",
                self.id,
                self.operation,
                self.key,
                self.value,
                self.rendered_time()
            ),
            Operation::Delete => write!(
                f,
                "#{} {} key='{}' at {}",
                self.id,
                self.operation,
                self.key,
                self.rendered_time()
            ),
        }
    }
}

impl PartialEq for LogEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for LogEntry {}

impl PartialOrd for LogEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
