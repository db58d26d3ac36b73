//! Per-attempt streaming session: event log plus snapshot publication.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::axes::{filter_axes, AxisCatalog};
use super::event::{fields, StreamEvent, StreamEventKind, StreamEventSink};
use super::run::StreamingRun;
use super::snapshot::{GatingBaseline, SnapshotSlot, StreamingSnapshot};
use crate::error::Result;
use crate::gate::{DropObserver, DropReason};
use crate::phase::{PhaseState, PhaseStore};

/// Entry handed to a [`HistoryWriter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntryRequest {
    pub request_id: String,
    pub text: String,
    pub axes: BTreeMap<String, Vec<String>>,
}

/// Persists finished responses. Returns the stored prompt text.
pub trait HistoryWriter: Send + Sync {
    fn append_entry(&self, entry: &LogEntryRequest) -> Result<String>;
}

#[derive(Debug, Default)]
struct SessionInner {
    run: StreamingRun,
    events: Vec<StreamEvent>,
    seq: u64,
}

/// Owns the [`StreamingRun`] for one attempt.
///
/// Every recorded event appends to the log and republishes the snapshot
/// under the same lock, so the published snapshot always reflects every
/// event before it. A retired session keeps its own log but no longer
/// publishes.
pub struct StreamingSession {
    request_id: String,
    inner: Mutex<SessionInner>,
    baseline: GatingBaseline,
    slot: SnapshotSlot,
    sink: Option<StreamEventSink>,
    retired: AtomicBool,
}

impl std::fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSession")
            .field("request_id", &self.request_id)
            .field("events", &self.events().len())
            .finish()
    }
}

impl StreamingSession {
    /// Start a session publishing into `slot`.
    ///
    /// Gating counters already published for the same request id are
    /// carried forward.
    pub fn new(request_id: impl Into<String>, slot: SnapshotSlot) -> Self {
        let session = Self::build(request_id.into(), slot, false);
        session.publish_current();
        session
    }

    /// A session that records its own log but never publishes.
    pub fn detached(request_id: impl Into<String>, slot: SnapshotSlot) -> Self {
        Self::build(request_id.into(), slot, true)
    }

    fn build(request_id: String, slot: SnapshotSlot, retired: bool) -> Self {
        let baseline = GatingBaseline::inherit(&slot.current(), &request_id);
        Self {
            inner: Mutex::new(SessionInner {
                run: StreamingRun::new(request_id.clone()),
                ..Default::default()
            }),
            request_id,
            baseline,
            slot,
            sink: None,
            retired: AtomicBool::new(retired),
        }
    }

    pub fn with_sink(mut self, sink: StreamEventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Whether a newer session replaced this one in the snapshot slot.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Stop publishing. Taken under the run lock so an in-progress record
    /// finishes its publication first.
    pub(crate) fn retire(&self) {
        let _inner = self.lock();
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn run(&self) -> StreamingRun {
        self.lock().run.clone()
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.lock().events.clone()
    }

    pub fn event_kinds(&self) -> Vec<StreamEventKind> {
        self.lock().events.iter().map(|e| e.kind).collect()
    }

    /// Snapshot as it would be published now.
    pub fn snapshot(&self) -> StreamingSnapshot {
        StreamingSnapshot::build(&self.lock().run, &self.baseline)
    }

    pub fn text(&self) -> String {
        self.lock().run.text()
    }

    pub fn record_chunk(&self, text: &str) -> bool {
        self.record(
            StreamEventKind::Chunk,
            fields([("text", json!(text))]),
            |run| run.on_chunk(text),
        )
    }

    /// Mark complete. A no-op after an error.
    pub fn record_complete(&self) -> bool {
        self.record(StreamEventKind::Complete, Map::new(), StreamingRun::on_complete)
    }

    pub fn record_error(&self, message: &str) {
        self.record(
            StreamEventKind::Error,
            fields([("message", json!(message))]),
            |run| {
                run.on_error(message);
                true
            },
        );
    }

    pub fn record_gating_drop(&self, reason: &str, phase: &str, source: &str, message: &str) {
        self.record(
            StreamEventKind::GatingDrop,
            fields([
                ("reason", json!(reason)),
                ("phase", json!(phase)),
                ("source", json!(source)),
                ("message", json!(message)),
            ]),
            |run| {
                run.on_gating_drop(reason, source);
                true
            },
        );
    }

    pub fn record_cancel_requested(&self, source: &str, phase: &str, detail: &str) {
        self.record(
            StreamEventKind::CancelRequested,
            fields([
                ("source", json!(source)),
                ("phase", json!(phase)),
                ("detail", json!(detail)),
            ]),
            |_| true,
        );
    }

    /// Record a cancel request if `state` carries one.
    pub fn cancel_requested(&self, state: &PhaseState, source: &str) -> bool {
        if !state.cancel_requested {
            return false;
        }
        self.record_cancel_requested(source, &state.phase.to_string(), "");
        true
    }

    pub fn record_cancel_executed(&self, source: &str, emitted: bool) {
        self.record(
            StreamEventKind::CancelExecuted,
            fields([("source", json!(source)), ("emitted", json!(emitted))]),
            |_| true,
        );
    }

    pub fn record_history_saved(&self, path: &str, success: bool) {
        self.record(
            StreamEventKind::HistorySaved,
            fields([("path", json!(path)), ("success", json!(success))]),
            |_| true,
        );
    }

    pub fn record_ui_refresh_requested(&self, forced: bool, reason: &str) {
        self.record(
            StreamEventKind::UiRefreshRequested,
            fields([("forced", json!(forced)), ("reason", json!(reason))]),
            |_| true,
        );
    }

    pub fn record_ui_refresh_executed(
        &self,
        forced: bool,
        reason: &str,
        success: bool,
        error: Option<&str>,
    ) {
        let mut extra = fields([
            ("forced", json!(forced)),
            ("reason", json!(reason)),
            ("success", json!(success)),
        ]);
        if let Some(error) = error {
            extra.insert("error".into(), json!(error));
        }
        self.record(StreamEventKind::UiRefreshExecuted, extra, |_| true);
    }

    /// Ask `writer` to persist the accumulated response.
    ///
    /// Emits `history_write_requested` then `log_entry`. Returns the stored
    /// prompt on success.
    pub fn record_log_entry(&self, writer: &dyn HistoryWriter) -> Option<String> {
        let entry = {
            let inner = self.lock();
            LogEntryRequest {
                request_id: self.request_id.clone(),
                text: inner.run.text(),
                axes: inner.run.axes.clone(),
            }
        };
        let axes_keys: Vec<&String> = entry.axes.keys().collect();
        self.record(
            StreamEventKind::HistoryWriteRequested,
            fields([("axes_keys", json!(axes_keys))]),
            |_| true,
        );

        match writer.append_entry(&entry) {
            Ok(prompt) => {
                self.record(
                    StreamEventKind::LogEntry,
                    fields([("success", json!(true)), ("axes_keys", json!(axes_keys))]),
                    |_| true,
                );
                Some(prompt)
            }
            Err(err) => {
                tracing::warn!(error = %err, request_id = %self.request_id, "history write failed");
                self.record(
                    StreamEventKind::LogEntry,
                    fields([
                        ("success", json!(false)),
                        ("axes_keys", json!(axes_keys)),
                        ("error", json!(err.to_string())),
                    ]),
                    |_| true,
                );
                None
            }
        }
    }

    /// Replace the run's axes with the catalog-filtered `requested` axes.
    pub fn set_axes_from_request(
        &self,
        requested: &BTreeMap<String, Vec<String>>,
        catalog: &dyn AxisCatalog,
    ) -> BTreeMap<String, Vec<String>> {
        let filtered = filter_axes(requested, catalog);
        let mut inner = self.lock();
        inner.run.axes = filtered.clone();
        self.publish(&inner);
        filtered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_current(&self) {
        let inner = self.lock();
        self.publish(&inner);
    }

    fn publish(&self, inner: &SessionInner) {
        if self.is_retired() {
            return;
        }
        self.slot
            .publish(StreamingSnapshot::build(&inner.run, &self.baseline));
    }

    /// Apply `mutate`; if it reports a change, append an event and publish.
    fn record(
        &self,
        kind: StreamEventKind,
        fields: Map<String, Value>,
        mutate: impl FnOnce(&mut StreamingRun) -> bool,
    ) -> bool {
        let event = {
            let mut inner = self.lock();
            if !mutate(&mut inner.run) {
                tracing::trace!(%kind, request_id = %self.request_id, "event ignored");
                return false;
            }
            inner.seq += 1;
            let event = StreamEvent {
                kind,
                request_id: self.request_id.clone(),
                seq: inner.seq,
                timestamp: Utc::now(),
                fields,
            };
            inner.events.push(event.clone());
            self.publish(&inner);
            event
        };

        if let Some(sink) = &self.sink {
            sink(&event);
        }
        true
    }
}

/// Holds the current session and the snapshot slot it publishes to.
///
/// Registered as the gate's [`DropObserver`] so refusals land in the
/// active session's event log.
#[derive(Default)]
pub struct StreamingHub {
    slot: SnapshotSlot,
    current: RwLock<Option<Arc<StreamingSession>>>,
    sink: RwLock<Option<StreamEventSink>>,
}

impl std::fmt::Debug for StreamingHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingHub")
            .field("current", &self.current())
            .finish()
    }
}

impl StreamingHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self) -> &SnapshotSlot {
        &self.slot
    }

    pub fn set_sink(&self, sink: Option<StreamEventSink>) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    /// Create a session for `request_id` and make it current. The previous
    /// session is retired first.
    pub fn begin(&self, request_id: &str) -> Arc<StreamingSession> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = current.take() {
            previous.retire();
        }
        let session = StreamingSession::new(request_id, self.slot.clone());
        let session = Arc::new(self.attach_sink(session));
        *current = Some(session.clone());
        session
    }

    /// Like [`begin`](Self::begin), but only while `phases` still names
    /// `request_id` as its owner. A superseded request gets a detached
    /// session and the current one is left alone.
    pub fn begin_owned(&self, request_id: &str, phases: &PhaseStore) -> Arc<StreamingSession> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if phases.current().request_id.as_deref() != Some(request_id) {
            tracing::debug!(request_id, "superseded request gets a detached stream");
            let session = StreamingSession::detached(request_id, self.slot.clone());
            return Arc::new(self.attach_sink(session));
        }
        if let Some(previous) = current.take() {
            previous.retire();
        }
        let session = StreamingSession::new(request_id, self.slot.clone());
        let session = Arc::new(self.attach_sink(session));
        *current = Some(session.clone());
        session
    }

    fn attach_sink(&self, session: StreamingSession) -> StreamingSession {
        match self
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            Some(sink) => session.with_sink(sink),
            None => session,
        }
    }

    pub fn current(&self) -> Option<Arc<StreamingSession>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn snapshot(&self) -> Arc<StreamingSnapshot> {
        self.slot.current()
    }
}

impl DropObserver for StreamingHub {
    fn on_gating_drop(&self, state: &PhaseState, reason: &DropReason, source: &str, message: &str) {
        let Some(session) = self.current() else {
            return;
        };
        let matches = match state.request_id.as_deref() {
            Some(id) if !session.request_id().is_empty() => id == session.request_id(),
            _ => true,
        };
        if matches {
            session.record_gating_drop(reason.as_str(), &state.phase.to_string(), source, message);
        }
    }
}
