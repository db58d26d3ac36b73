//! Streaming session event log entries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

/// Kind discriminator for [`StreamEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StreamEventKind {
    Chunk,
    Complete,
    Error,
    GatingDrop,
    CancelRequested,
    CancelExecuted,
    HistorySaved,
    HistoryWriteRequested,
    LogEntry,
    UiRefreshRequested,
    UiRefreshExecuted,
}

/// One append-only entry in a session's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: StreamEventKind,
    pub request_id: String,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl StreamEvent {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }
}

/// Callback invoked for every appended event.
///
/// Called after the session lock is released; a sink may read the session
/// but must tolerate events from other threads arriving interleaved (use
/// `seq` for ordering).
pub type StreamEventSink = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Build the `fields` map from `(key, value)` pairs.
pub(crate) fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
