//! Request phases, the pure phase transition, and the lifecycle reducer.
//!
//! [`PhaseState`] is the UI-facing view of "where is the current request";
//! [`lifecycle::LifecycleState`] is the coarser, transport-agnostic status
//! used when reasoning about request progress. Both are plain values: every
//! transition returns a new state and never mutates in place.

pub mod lifecycle;
pub mod store;

pub use lifecycle::{reduce, LifecycleEvent, LifecycleState, LifecycleStatus};
pub use store::{PhaseSource, PhaseStore};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Point in a request's life.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Listening,
    Transcribing,
    Confirming,
    Sending,
    Streaming,
    Done,
    Error,
    Cancelled,
}

impl Phase {
    /// Whether a request in this phase occupies the single in-flight slot.
    pub fn is_in_flight(self) -> bool {
        is_in_flight(self)
    }

    /// Done, Error and Cancelled end a request.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }
}

/// True for Listening, Transcribing, Confirming, Sending and Streaming.
pub fn is_in_flight(phase: Phase) -> bool {
    matches!(
        phase,
        Phase::Listening
            | Phase::Transcribing
            | Phase::Confirming
            | Phase::Sending
            | Phase::Streaming
    )
}

/// Map a phase onto the coarse lifecycle status.
pub fn lifecycle_status_for(phase: Phase) -> LifecycleStatus {
    match phase {
        Phase::Idle | Phase::Listening | Phase::Transcribing | Phase::Confirming => {
            LifecycleStatus::Pending
        }
        Phase::Sending => LifecycleStatus::Running,
        Phase::Streaming => LifecycleStatus::Streaming,
        Phase::Done => LifecycleStatus::Completed,
        Phase::Error => LifecycleStatus::Errored,
        Phase::Cancelled => LifecycleStatus::Cancelled,
    }
}

/// Snapshot of the current request phase and cancellation intent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseState {
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_error: String,
}

impl PhaseState {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn is_in_flight(&self) -> bool {
        self.phase.is_in_flight()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn lifecycle(&self) -> LifecycleState {
        LifecycleState::new(lifecycle_status_for(self.phase))
    }
}

/// Events driving the phase transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEvent {
    Reset,
    StartListen,
    StartTranscribe,
    GotTranscript,
    ConfirmSend { request_id: Option<String> },
    BeginSend { request_id: Option<String> },
    BeginStream { request_id: Option<String> },
    Complete,
    Fail { error: String },
    Cancel,
    Retry { request_id: Option<String> },
}

/// Apply an event and return the next state. Pure; never mutates `state`.
pub fn transition(state: &PhaseState, event: &PhaseEvent) -> PhaseState {
    match event {
        PhaseEvent::Reset => PhaseState::default(),
        PhaseEvent::StartListen => PhaseState::new(Phase::Listening),
        PhaseEvent::StartTranscribe => PhaseState::new(Phase::Transcribing),
        PhaseEvent::GotTranscript => PhaseState::new(Phase::Confirming),
        PhaseEvent::ConfirmSend { request_id }
        | PhaseEvent::BeginSend { request_id }
        | PhaseEvent::Retry { request_id } => PhaseState {
            phase: Phase::Sending,
            request_id: request_id.clone().or_else(|| state.request_id.clone()),
            ..Default::default()
        },
        PhaseEvent::BeginStream { request_id } => PhaseState {
            phase: Phase::Streaming,
            request_id: request_id.clone().or_else(|| state.request_id.clone()),
            ..Default::default()
        },
        // The request id survives cancellation so clean-up can correlate.
        PhaseEvent::Cancel => PhaseState {
            phase: Phase::Cancelled,
            request_id: state.request_id.clone(),
            cancel_requested: true,
            last_error: String::new(),
        },
        PhaseEvent::Complete => PhaseState {
            phase: Phase::Done,
            request_id: state.request_id.clone(),
            ..Default::default()
        },
        PhaseEvent::Fail { error } => PhaseState {
            phase: Phase::Error,
            request_id: state.request_id.clone(),
            cancel_requested: false,
            last_error: if error.is_empty() {
                state.last_error.clone()
            } else {
                error.clone()
            },
        },
    }
}
