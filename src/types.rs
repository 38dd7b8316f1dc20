//! Core types for gmail-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Opaque identifier of one remote message
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a new MessageId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One listing response: identifiers plus the cursor for the next request
///
/// `next_cursor == None` marks the last page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Page {
    /// Identifiers in server order
    pub ids: Vec<MessageId>,
    /// Opaque continuation token
    pub next_cursor: Option<String>,
}

impl Page {
    /// True when the server signalled the end of the sequence
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Full remote representation of one message
///
/// Kept as an uninterpreted JSON document; key order is preserved so the
/// serialized line matches what the server returned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub serde_json::Value);

impl Record {
    /// The `id` field of the document, when present
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(|v| v.as_str())
    }

    /// Borrow the underlying document
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<serde_json::Value> for Record {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Why a single identifier in a batch could not be fetched
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchFailure {
    /// The identifier that failed
    pub id: MessageId,
    /// HTTP status of the sub-response, if one was received
    pub status: Option<u16>,
    /// Error detail reported by the remote side
    pub message: String,
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {}): {}", self.id, status, self.message),
            None => write!(f, "{}: {}", self.id, self.message),
        }
    }
}

/// Result of fetching one identifier
#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome {
    /// The full document
    Record(Record),
    /// The per-item error
    Failure(FetchFailure),
}

/// Counters describing a finished run
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    /// Listing pages processed
    pub pages: u64,
    /// Identifiers listed across all pages
    pub listed: u64,
    /// Records appended to the output log
    pub records: u64,
    /// Per-item failures that were skipped
    pub failures: u64,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
    /// Location of the output log
    pub output_path: PathBuf,
}
