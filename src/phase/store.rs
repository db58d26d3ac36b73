//! Single-owner holder of the current [`PhaseState`].
//!
//! The store is the request bus: every entry point and the background
//! worker emit phase events through it, and observers subscribe with
//! [`PhaseStore::watch`]. Each emit replaces the whole state inside the
//! watch channel, so a concurrent reader sees either the old or the new
//! value, never a mix.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{transition, LifecycleState, Phase, PhaseEvent, PhaseState};
use crate::error::{ParleyError, Result};

/// Anything that can report the current phase.
///
/// Reads may fail (for example when the owning store has been torn down);
/// the admission gate treats such failures as "allowed".
pub trait PhaseSource: Send + Sync {
    fn current_phase_state(&self) -> Result<PhaseState>;
}

/// Owner of the current phase, request ids and the per-request cancel token.
#[derive(Debug)]
pub struct PhaseStore {
    tx: watch::Sender<PhaseState>,
    counter: AtomicU64,
    cancel: Mutex<CancellationToken>,
    closed: AtomicBool,
}

impl Default for PhaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PhaseState::default());
        Self {
            tx,
            counter: AtomicU64::new(0),
            cancel: Mutex::new(CancellationToken::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Current state. Cheap clone of the published value.
    pub fn current(&self) -> PhaseState {
        self.tx.borrow().clone()
    }

    /// Subscribe to phase changes.
    pub fn watch(&self) -> watch::Receiver<PhaseState> {
        self.tx.subscribe()
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.current().lifecycle()
    }

    pub fn is_in_flight(&self) -> bool {
        self.tx.borrow().is_in_flight()
    }

    /// Allocate the next `req-N` identifier.
    pub fn next_request_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("req-{n}")
    }

    /// Token for the request currently owning the slot.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The cancel token armed for `request_id`, or `None` once another
    /// request took the slot or this one was cancelled.
    pub fn cancellation_for(&self, request_id: &str) -> Option<CancellationToken> {
        let token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.tx.borrow();
        let owned = state.request_id.as_deref() == Some(request_id)
            && state.is_in_flight()
            && !state.cancel_requested
            && !token.is_cancelled();
        owned.then(|| token.clone())
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.tx.borrow().cancel_requested || self.cancellation().is_cancelled()
    }

    /// Apply an event and publish the resulting state.
    pub fn apply(&self, event: PhaseEvent) -> PhaseState {
        let mut next = PhaseState::default();
        self.tx.send_modify(|state| {
            *state = transition(state, &event);
            next = state.clone();
        });
        tracing::debug!(
            phase = %next.phase,
            request_id = next.request_id.as_deref().unwrap_or(""),
            "phase transition"
        );
        next
    }

    /// Apply `event` only while `request_id` owns the store and `allow`
    /// accepts the current state. Check and transition happen under the
    /// channel lock. Returns the new state when applied.
    fn apply_owned(
        &self,
        request_id: &str,
        event: PhaseEvent,
        allow: impl Fn(&PhaseState) -> bool,
    ) -> Option<PhaseState> {
        let mut next = None;
        self.tx.send_if_modified(|state| {
            if state.request_id.as_deref() != Some(request_id) || !allow(state) {
                return false;
            }
            *state = transition(state, &event);
            next = Some(state.clone());
            true
        });
        match &next {
            Some(state) => tracing::debug!(phase = %state.phase, request_id, "phase transition"),
            None => tracing::debug!(request_id, ?event, "stale phase event ignored"),
        }
        next
    }

    pub fn emit_reset(&self) -> PhaseState {
        self.apply(PhaseEvent::Reset)
    }

    /// Enter Sending and arm a fresh cancel token. Returns the request id.
    pub fn emit_begin_send(&self, request_id: Option<String>) -> String {
        let rid = request_id.unwrap_or_else(|| self.next_request_id());
        let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        *token = CancellationToken::new();
        self.apply(PhaseEvent::BeginSend {
            request_id: Some(rid.clone()),
        });
        rid
    }

    pub fn emit_begin_stream(&self, request_id: Option<String>) -> String {
        let rid = request_id
            .or_else(|| self.current().request_id)
            .unwrap_or_else(|| self.next_request_id());
        self.apply(PhaseEvent::BeginStream {
            request_id: Some(rid.clone()),
        });
        rid
    }

    /// Enter Streaming for `request_id` if it is still sending and was not
    /// cancelled meanwhile.
    pub fn emit_begin_stream_for(&self, request_id: &str) -> bool {
        self.apply_owned(
            request_id,
            PhaseEvent::BeginStream {
                request_id: Some(request_id.to_string()),
            },
            |state| state.phase == Phase::Sending && !state.cancel_requested,
        )
        .is_some()
    }

    pub fn emit_complete(&self) -> PhaseState {
        self.apply(PhaseEvent::Complete)
    }

    /// Complete `request_id` if it still owns the in-flight slot.
    pub fn emit_complete_for(&self, request_id: &str) -> Option<PhaseState> {
        self.apply_owned(request_id, PhaseEvent::Complete, PhaseState::is_in_flight)
    }

    pub fn emit_fail(&self, error: impl Into<String>) -> PhaseState {
        self.apply(PhaseEvent::Fail {
            error: error.into(),
        })
    }

    /// Fail `request_id` if it still owns the in-flight slot.
    pub fn emit_fail_for(&self, request_id: &str, error: impl Into<String>) -> Option<PhaseState> {
        self.apply_owned(
            request_id,
            PhaseEvent::Fail {
                error: error.into(),
            },
            PhaseState::is_in_flight,
        )
    }

    /// Move to Cancelled and trip the current cancel token.
    ///
    /// The worker is not interrupted; it observes the token between chunks.
    pub fn emit_cancel(&self) -> PhaseState {
        let token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.apply(PhaseEvent::Cancel);
        token.cancel();
        state
    }

    /// Cancel `request_id` if it still owns the in-flight slot. Another
    /// request's token is never tripped.
    pub fn emit_cancel_for(&self, request_id: &str) -> Option<PhaseState> {
        let token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.apply_owned(request_id, PhaseEvent::Cancel, PhaseState::is_in_flight)?;
        token.cancel();
        Some(state)
    }

    pub fn emit_retry(&self, request_id: Option<String>) -> PhaseState {
        let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        *token = CancellationToken::new();
        self.apply(PhaseEvent::Retry { request_id })
    }

    /// Detach the store. Later reads through [`PhaseSource`] fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PhaseSource for PhaseStore {
    fn current_phase_state(&self) -> Result<PhaseState> {
        if self.is_closed() {
            return Err(ParleyError::DependencyUnavailable(
                "phase store is closed".into(),
            ));
        }
        Ok(self.current())
    }
}
