//! Transport-agnostic request lifecycle and its reducer.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Logical request status.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleStatus {
    #[default]
    Pending,
    Running,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl LifecycleStatus {
    /// Errored and cancelled only leave through an explicit retry.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Errored | Self::Cancelled)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Running | Self::Streaming)
    }
}

/// Lifecycle state wrapper; a value type so reducers can return it unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleState {
    pub status: LifecycleStatus,
}

impl LifecycleState {
    pub fn new(status: LifecycleStatus) -> Self {
        Self { status }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_in_flight(&self) -> bool {
        self.status.is_in_flight()
    }
}

/// High-level lifecycle events.
///
/// Parsed from their wire names (`"start"`, `"stream_start"`, ...); any
/// other name becomes [`LifecycleEvent::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleEvent {
    Start,
    StreamStart,
    StreamEnd,
    Complete,
    Error,
    Cancel,
    Retry,
    #[strum(default)]
    Unknown(String),
}

/// Pure reducer over [`LifecycleState`].
///
/// Events that do not apply to the current status return `state` itself.
/// `retry` only leaves errored/cancelled; from any other status it is a no-op.
pub fn reduce(state: LifecycleState, event: &LifecycleEvent) -> LifecycleState {
    use LifecycleStatus::*;

    let status = state.status;
    if status.is_terminal() {
        return match event {
            LifecycleEvent::Retry => LifecycleState::new(Running),
            _ => state,
        };
    }

    let next = match (event, status) {
        (LifecycleEvent::Start, Pending | Completed) => Running,
        (LifecycleEvent::StreamStart, Running | Streaming) => Streaming,
        (LifecycleEvent::StreamEnd, Running | Streaming) => Completed,
        (LifecycleEvent::Complete, Pending | Running | Streaming) => Completed,
        (LifecycleEvent::Cancel, Pending | Running | Streaming) => Cancelled,
        (LifecycleEvent::Error, s) if s != Completed => Errored,
        _ => return state,
    };
    LifecycleState::new(next)
}

/// Convenience wrapper parsing the event name first.
pub fn reduce_named(state: LifecycleState, event: &str) -> LifecycleState {
    let event = event
        .parse::<LifecycleEvent>()
        .unwrap_or_else(|_| LifecycleEvent::Unknown(event.to_string()));
    reduce(state, &event)
}
