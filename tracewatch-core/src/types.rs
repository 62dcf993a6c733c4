//! Core domain types for tracewatch
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Trace** | One recorded operation (request, render step, query, websocket frame) with timing and an attribute bag |
//! | **Root trace** | A trace not attached as a child of any other trace in the reconstructed tree |
//! | **Sampling session** | One bounded window of trace capture, identified by a server-assigned id |
//! | **Task** | A long-running unit of work with progress reporting, tracked separately from the trace tree |
//!
//! A `Trace` is immutable once observed except for its `children` list, which
//! only ever grows as later batches resolve more of the tree. Trace ids are
//! opaque: the producer may emit them as JSON strings or numbers, so both are
//! accepted and normalized to strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================
// Id normalization
// ============================================

/// Deserialize an opaque id that may arrive as a JSON string or number.
fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// Deserialize an optional opaque id (string or number).
fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

// ============================================
// Trace
// ============================================

/// The attribute bag attached to a trace.
///
/// Only the fields the engine inspects are typed; every other key the
/// producer sends is preserved verbatim in `extra` and round-trips on
/// serialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceData {
    /// Reference to the logical parent, present only on traces delivered
    /// out-of-band from it (e.g. sub-requests of an open websocket).
    #[serde(
        rename = "parentId",
        default,
        deserialize_with = "de_opt_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<String>,

    /// Request path as served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Raw request path before any rewriting; preferred for classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rawpath: Option<String>,

    /// Response content type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Set when the trace represents a websocket connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket: Option<bool>,

    /// All remaining producer-defined attributes, untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TraceData {
    /// Look up a pass-through attribute as a string slice.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    /// Look up a pass-through attribute as an unsigned integer.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.extra.get(key).and_then(Value::as_u64)
    }
}

/// Status of a websocket connection derived from its child traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebSocketStatus {
    Open,
    Closed,
}

/// One observed operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Opaque identifier, unique among root-eligible traces within a session
    #[serde(deserialize_with = "de_id")]
    pub id: String,

    /// Operation kind tag ("portalRequest", "renderComponent", "task.run",
    /// dotted `<stack>.<method>` names, ...)
    pub name: String,

    /// Start timestamp, milliseconds since epoch
    #[serde(default)]
    pub start: i64,

    /// Duration in milliseconds
    #[serde(default)]
    pub duration: u64,

    /// Open attribute map, keys depend on `name`
    #[serde(default)]
    pub data: TraceData,

    /// Resolved sub-operations, insertion order = structural order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Trace>,
}

impl Trace {
    /// The request path, or empty when the trace carries none.
    pub fn path(&self) -> &str {
        self.data.path.as_deref().unwrap_or("")
    }

    /// The path used for category classification: the raw path when present,
    /// otherwise the served path.
    pub fn display_path(&self) -> Option<&str> {
        self.data.rawpath.as_deref().or(self.data.path.as_deref())
    }

    /// Whether this trace represents a websocket connection.
    pub fn is_websocket(&self) -> bool {
        self.data.websocket.unwrap_or(false)
    }

    /// Connection status of a websocket trace, derived from its child
    /// `websocket` traces: a `close` event wins over any `open` before it.
    pub fn websocket_status(&self) -> Option<WebSocketStatus> {
        let mut status = None;
        for child in &self.children {
            if child.name == "websocket" {
                match child.data.content_type.as_deref() {
                    Some("open") => status = Some(WebSocketStatus::Open),
                    Some("close") => return Some(WebSocketStatus::Closed),
                    _ => {}
                }
            }
        }
        status
    }
}

// ============================================
// Tasks
// ============================================

/// Lifecycle state of a tracked task.
///
/// The producer is authoritative; values outside the known set are carried
/// opaquely and never treated as terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskState {
    Waiting,
    Running,
    Finished,
    Failed,
    Other(String),
}

impl TaskState {
    pub fn as_str(&self) -> &str {
        match self {
            TaskState::Waiting => "WAITING",
            TaskState::Running => "RUNNING",
            TaskState::Finished => "FINISHED",
            TaskState::Failed => "FAILED",
            TaskState::Other(s) => s,
        }
    }

    /// Whether the task can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Failed)
    }
}

impl From<String> for TaskState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "WAITING" => TaskState::Waiting,
            "RUNNING" => TaskState::Running,
            "FINISHED" => TaskState::Finished,
            "FAILED" => TaskState::Failed,
            _ => TaskState::Other(s),
        }
    }
}

impl From<TaskState> for String {
    fn from(state: TaskState) -> Self {
        state.as_str().to_string()
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress report for a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    #[serde(default)]
    pub current: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub info: String,
}

impl TaskProgress {
    /// A non-positive total means the task cannot report a completion ratio.
    pub fn is_indeterminate(&self) -> bool {
        self.total <= 0
    }
}

/// A long-running, independently tracked unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(deserialize_with = "de_id")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub application: String,

    #[serde(default)]
    pub user: String,

    pub state: TaskState,

    #[serde(default)]
    pub progress: TaskProgress,

    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    /// Derived locally: stamped once, the first time `state` transitions
    /// into a terminal value. Never re-derived afterward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}
