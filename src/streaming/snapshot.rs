//! Published streaming snapshots and the slot observers read them from.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use super::run::StreamingRun;

/// Coarse status for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StreamStatus {
    Inflight,
    Completed,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatingDropCount {
    pub reason: String,
    pub count: u64,
}

/// Immutable view of a streaming attempt, published whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingSnapshot {
    pub request_id: String,
    pub text: String,
    pub completed: bool,
    pub errored: bool,
    pub error_message: String,
    pub axes: BTreeMap<String, Vec<String>>,
    pub gating_drop_counts: BTreeMap<String, u64>,
    /// Count descending, then reason ascending.
    pub gating_drop_counts_sorted: Vec<GatingDropCount>,
    pub gating_drop_sources: BTreeMap<String, u64>,
    pub gating_drop_total: u64,
    pub gating_drop_last: Option<GatingDropCount>,
}

/// Minimal shape a response canvas needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasView {
    pub text: String,
    pub status: StreamStatus,
    pub error_message: String,
}

/// Gating counters carried over from an earlier attempt of the same request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct GatingBaseline {
    pub counts: BTreeMap<String, u64>,
    pub sources: BTreeMap<String, u64>,
}

impl GatingBaseline {
    /// Baseline for `request_id`: the prior snapshot's counters when it
    /// belongs to the same request, otherwise empty.
    pub fn inherit(prior: &StreamingSnapshot, request_id: &str) -> Self {
        if prior.request_id != request_id {
            return Self::default();
        }
        Self {
            counts: prior.gating_drop_counts.clone(),
            sources: prior.gating_drop_sources.clone(),
        }
    }
}

fn merge_counts(base: &BTreeMap<String, u64>, extra: &BTreeMap<String, u64>) -> BTreeMap<String, u64> {
    let mut merged = base.clone();
    for (key, count) in extra {
        *merged.entry(key.clone()).or_default() += count;
    }
    merged
}

impl StreamingSnapshot {
    pub(crate) fn build(run: &StreamingRun, baseline: &GatingBaseline) -> Self {
        let counts = merge_counts(&baseline.counts, &run.gating_drop_counts);
        let sources = merge_counts(&baseline.sources, &run.gating_drop_sources);

        let mut sorted: Vec<GatingDropCount> = counts
            .iter()
            .map(|(reason, count)| GatingDropCount {
                reason: reason.clone(),
                count: *count,
            })
            .collect();
        sorted.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.reason.cmp(&b.reason)));

        let last = run.gating_drop_last.as_ref().map(|reason| GatingDropCount {
            reason: reason.clone(),
            count: counts.get(reason).copied().unwrap_or_default(),
        });

        Self {
            request_id: run.request_id.clone(),
            text: run.text(),
            completed: run.completed,
            errored: run.errored,
            error_message: run.error_message.clone(),
            axes: run.axes.clone(),
            gating_drop_total: counts.values().sum(),
            gating_drop_counts: counts,
            gating_drop_counts_sorted: sorted,
            gating_drop_sources: sources,
            gating_drop_last: last,
        }
    }

    /// `completed` only when completed and not errored.
    pub fn status(&self) -> StreamStatus {
        if self.errored {
            StreamStatus::Errored
        } else if self.completed {
            StreamStatus::Completed
        } else {
            StreamStatus::Inflight
        }
    }

    pub fn canvas_view(&self) -> CanvasView {
        CanvasView {
            text: self.text.clone(),
            status: self.status(),
            error_message: self.error_message.clone(),
        }
    }
}

/// Shared, externally observable slot holding the latest snapshot.
///
/// Publication swaps the whole `Arc`, so readers on any thread always see a
/// fully formed snapshot. Presentation code reads only from here.
#[derive(Debug, Clone)]
pub struct SnapshotSlot {
    tx: Arc<watch::Sender<Arc<StreamingSnapshot>>>,
}

impl Default for SnapshotSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(StreamingSnapshot::default()));
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Arc<StreamingSnapshot> {
        self.tx.borrow().clone()
    }

    pub fn publish(&self, snapshot: StreamingSnapshot) {
        self.tx.send_replace(Arc::new(snapshot));
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StreamingSnapshot>> {
        self.tx.subscribe()
    }

    /// Snapshot updates as a stream, starting with the current value.
    pub fn stream(&self) -> WatchStream<Arc<StreamingSnapshot>> {
        WatchStream::new(self.subscribe())
    }
}
