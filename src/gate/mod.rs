//! Admission control for the single in-flight request slot.
//!
//! Every entry point asks the gate before dispatching work. The gate does
//! not hold a lock across the request; exclusivity comes from checking the
//! published [`PhaseState`]. [`AdmissionGate::try_claim`] additionally
//! serializes check-and-begin so two concurrent callers cannot both win.

pub mod reason;

pub use reason::{DropReason, DropRecord};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};
use crate::phase::{PhaseSource, PhaseState, PhaseStore};

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The attempt may start. `request_id` is set when the gate also
    /// claimed the slot on the caller's behalf.
    Allowed { request_id: Option<String> },
    Rejected { reason: DropReason, message: String },
}

impl Admission {
    pub fn allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    pub fn reason(&self) -> Option<&DropReason> {
        match self {
            Self::Allowed { .. } => None,
            Self::Rejected { reason, .. } => Some(reason),
        }
    }

    /// The `(allowed, reason)` pair; reason is empty when allowed.
    pub fn as_pair(&self) -> (bool, String) {
        (
            self.allowed(),
            self.reason().map(|r| r.to_string()).unwrap_or_default(),
        )
    }

    pub fn into_result(self) -> Result<Option<String>> {
        match self {
            Self::Allowed { request_id } => Ok(request_id),
            Self::Rejected { reason, message } => Err(ParleyError::AdmissionRejected {
                reason: reason.to_string(),
                message,
            }),
        }
    }
}

/// Receives gating drops so the active streaming session can log them.
pub trait DropObserver: Send + Sync {
    fn on_gating_drop(&self, state: &PhaseState, reason: &DropReason, source: &str, message: &str);
}

/// Point-in-time view of the gate's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatingStatistics {
    pub counts: BTreeMap<String, u64>,
    pub sources: BTreeMap<String, u64>,
    /// reason -> source -> count
    pub reason_sources: BTreeMap<String, BTreeMap<String, u64>>,
    /// `(reason, count for that reason)` of the most recent drop.
    pub last_drop: Option<(String, u64)>,
    pub last_source: Option<String>,
    pub last_message: String,
    pub total: u64,
}

#[derive(Debug, Default)]
struct GatingCounters {
    counts: BTreeMap<String, u64>,
    sources: BTreeMap<String, u64>,
    reason_sources: BTreeMap<String, BTreeMap<String, u64>>,
    last_reason: Option<String>,
    last_source: Option<String>,
    last_message: String,
}

impl GatingCounters {
    fn record(&mut self, reason: &DropReason, source: &str, message: &str) {
        let code = reason.to_string();
        *self.counts.entry(code.clone()).or_default() += 1;
        *self.sources.entry(source.to_string()).or_default() += 1;
        *self
            .reason_sources
            .entry(code.clone())
            .or_default()
            .entry(source.to_string())
            .or_default() += 1;
        self.last_reason = Some(code);
        self.last_source = Some(source.to_string());
        self.last_message = message.to_string();
    }

    fn statistics(&self) -> GatingStatistics {
        let last_drop = self.last_reason.as_ref().map(|reason| {
            let count = self.counts.get(reason).copied().unwrap_or_default();
            (reason.clone(), count)
        });
        GatingStatistics {
            counts: self.counts.clone(),
            sources: self.sources.clone(),
            reason_sources: self.reason_sources.clone(),
            last_drop,
            last_source: self.last_source.clone(),
            last_message: self.last_message.clone(),
            total: self.counts.values().sum(),
        }
    }
}

/// Decides whether a new request may start and tracks refusals.
#[derive(Default)]
pub struct AdmissionGate {
    counters: Mutex<GatingCounters>,
    last_drop: Mutex<Option<DropRecord>>,
    observer: RwLock<Option<Arc<dyn DropObserver>>>,
    claim: Mutex<()>,
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("statistics", &self.statistics())
            .field("last_drop", &self.last_drop_record())
            .finish()
    }
}

/// Blank sources are reported as `unspecified`.
fn normalize_source(source: &str) -> String {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        "unspecified".to_string()
    } else {
        trimmed.to_string()
    }
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward future drops to `observer` (typically the session slot).
    pub fn with_observer(self, observer: Arc<dyn DropObserver>) -> Self {
        self.set_observer(Some(observer));
        self
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn DropObserver>>) {
        *self.observer.write().unwrap_or_else(PoisonError::into_inner) = observer;
    }

    /// Check `state` for a new attempt from `source`.
    pub fn try_begin(&self, state: &PhaseState, source: &str) -> Admission {
        if !state.is_in_flight() {
            self.clear_last_drop();
            return Admission::Allowed { request_id: None };
        }
        self.reject(state, DropReason::InFlight, source)
    }

    /// Check the phase reported by `phases`.
    ///
    /// Fails open (allowed) when the phase cannot be read.
    pub fn try_begin_current(&self, phases: &dyn PhaseSource, source: &str) -> Admission {
        match phases.current_phase_state() {
            Ok(state) => self.try_begin(&state, source),
            Err(err) => {
                tracing::warn!(error = %err, source, "phase unavailable; admitting request");
                Admission::Allowed { request_id: None }
            }
        }
    }

    /// Check and, when allowed, move `store` into Sending in one step.
    ///
    /// Concurrent callers are serialized, so at most one of them is allowed
    /// while the claimed request is in flight.
    pub fn try_claim(&self, store: &PhaseStore, source: &str) -> Admission {
        let _guard = self.claim.lock().unwrap_or_else(PoisonError::into_inner);
        match self.try_begin_current(store, source) {
            Admission::Allowed { .. } => Admission::Allowed {
                request_id: Some(store.emit_begin_send(None)),
            },
            rejected => rejected,
        }
    }

    fn reject(&self, state: &PhaseState, reason: DropReason, source: &str) -> Admission {
        let source = normalize_source(source);
        let message = reason.message();

        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(&reason, &source, &message);
        *self.last_drop.lock().unwrap_or_else(PoisonError::into_inner) = Some(DropRecord {
            reason: reason.clone(),
            message: message.clone(),
            source: source.clone(),
        });

        tracing::debug!(
            reason = %reason,
            source = %source,
            request_id = state.request_id.as_deref().unwrap_or(""),
            "request admission dropped"
        );

        let observer = self
            .observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(observer) = observer {
            observer.on_gating_drop(state, &reason, &source, &message);
        }

        Admission::Rejected { reason, message }
    }

    fn clear_last_drop(&self) {
        *self.last_drop.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Message of the last drop, empty when the last attempt was allowed.
    pub fn last_drop_reason(&self) -> String {
        self.last_drop_record()
            .map(|record| record.message)
            .unwrap_or_default()
    }

    pub fn last_drop_record(&self) -> Option<DropRecord> {
        self.last_drop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Return and clear the last drop record.
    pub fn consume_last_drop_reason(&self) -> Option<DropRecord> {
        self.last_drop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn statistics(&self) -> GatingStatistics {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .statistics()
    }

    /// Drop counts grouped by reason.
    pub fn gating_drop_stats(&self) -> BTreeMap<String, u64> {
        self.statistics().counts
    }

    /// Drop counts grouped by source.
    pub fn gating_drop_source_stats(&self) -> BTreeMap<String, u64> {
        self.statistics().sources
    }

    /// Snapshot the per-reason counts and reset every counter.
    ///
    /// Meant for periodic exporters, not request-handling code.
    pub fn consume_gating_drop_stats(&self) -> BTreeMap<String, u64> {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *counters).counts
    }
}

/// Whether a request is in flight; unreadable state counts as idle.
pub fn request_is_in_flight(phases: &dyn PhaseSource) -> bool {
    phases
        .current_phase_state()
        .map(|state| state.is_in_flight())
        .unwrap_or(false)
}
