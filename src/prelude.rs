//! Convenience re-exports for common use.

pub use crate::assistant::{Assistant, ExecutionMode, Submission};
pub use crate::config::ParleyConfig;
pub use crate::context::RequestContext;
pub use crate::delegation::{parse_directive, DelegationOrchestrator, ParsedDirective};
pub use crate::dispatch::{AsyncHandle, DispatchError, Dispatcher, Presenter};
pub use crate::error::{ParleyError, Result};
pub use crate::gate::{Admission, AdmissionGate, DropReason};
pub use crate::phase::{Phase, PhaseEvent, PhaseState, PhaseStore};
pub use crate::pipeline::{
    Destination, PromptRequest, PromptResult, RequestPipeline, Source, StaticSystemPrompt,
    SystemPromptBuilder, TextSource,
};
pub use crate::streaming::{SnapshotSlot, StreamingSession, StreamingSnapshot};
pub use crate::transport::{Transport, TransportRequest};
pub use crate::types::{ContentPart, Message, Role};
