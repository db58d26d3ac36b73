//! Periodic export of gating drop counters.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ParleyConfig;
use crate::gate::AdmissionGate;

/// One export of drop counts since the previous export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatingTelemetry {
    pub counts: BTreeMap<String, u64>,
    /// `(reason, count)`, count descending then reason ascending.
    pub counts_sorted: Vec<(String, u64)>,
    pub total: u64,
    pub exported_at: DateTime<Utc>,
}

impl GatingTelemetry {
    fn from_counts(counts: BTreeMap<String, u64>) -> Self {
        let mut counts_sorted: Vec<(String, u64)> =
            counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        counts_sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Self {
            total: counts.values().sum(),
            counts,
            counts_sorted,
            exported_at: Utc::now(),
        }
    }
}

/// Receives each non-empty export.
pub type TelemetrySink = Arc<dyn Fn(&GatingTelemetry) + Send + Sync>;

/// Drains the gate's counters into a sink.
#[derive(Clone)]
pub struct TelemetryExporter {
    gate: Arc<AdmissionGate>,
    sink: TelemetrySink,
    cancel: CancellationToken,
}

impl std::fmt::Debug for TelemetryExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryExporter")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl TelemetryExporter {
    pub fn new(gate: Arc<AdmissionGate>, sink: TelemetrySink) -> Self {
        Self {
            gate,
            sink,
            cancel: CancellationToken::new(),
        }
    }

    /// Consume the counters and deliver them. Nothing is sent when no drop
    /// happened since the last export.
    pub fn export_once(&self) -> Option<GatingTelemetry> {
        let counts = self.gate.consume_gating_drop_stats();
        if counts.is_empty() {
            return None;
        }
        let telemetry = GatingTelemetry::from_counts(counts);
        tracing::info!(total = telemetry.total, "gating telemetry exported");
        (self.sink)(&telemetry);
        Some(telemetry)
    }

    /// Export every `interval` until [`Self::shutdown`]. A final export runs
    /// on shutdown. A zero interval only exports on shutdown.
    pub fn spawn(&self, interval: Duration) -> JoinHandle<()> {
        let exporter = self.clone();
        tokio::spawn(async move {
            if interval.is_zero() {
                exporter.cancel.cancelled().await;
                exporter.export_once();
                return;
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = exporter.cancel.cancelled() => {
                        exporter.export_once();
                        return;
                    }
                    _ = ticker.tick() => {
                        exporter.export_once();
                    }
                }
            }
        })
    }

    /// [`spawn`](Self::spawn) with the configured telemetry interval.
    pub fn spawn_from_config(&self, config: &ParleyConfig) -> JoinHandle<()> {
        self.spawn(config.telemetry_interval())
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
