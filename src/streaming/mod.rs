//! Streaming response accumulation.
//!
//! A [`StreamingSession`] owns one attempt's [`StreamingRun`], appends to an
//! ordered event log, and republishes an immutable [`StreamingSnapshot`]
//! into a [`SnapshotSlot`] after each event. Renderers read the slot only.

pub mod axes;
pub mod event;
pub mod run;
pub mod session;
pub mod snapshot;

pub use axes::{filter_axes, AxisCatalog, StaticAxisCatalog};
pub use event::{StreamEvent, StreamEventKind, StreamEventSink};
pub use run::StreamingRun;
pub use session::{HistoryWriter, LogEntryRequest, StreamingHub, StreamingSession};
pub use snapshot::{CanvasView, GatingDropCount, SnapshotSlot, StreamStatus, StreamingSnapshot};
