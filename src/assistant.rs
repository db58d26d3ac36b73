//! Entry point shared by every caller: gate first, then run.

use std::sync::Arc;

use crate::context::RequestContext;
use crate::delegation::DelegationOrchestrator;
use crate::dispatch::AsyncHandle;
use crate::error::Result;
use crate::gate::{Admission, DropReason};
use crate::phase::PhaseStore;
use crate::pipeline::{PromptRequest, PromptResult, RequestPipeline};

/// Whether `submit` waits for the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    #[default]
    Blocking,
    Background,
}

/// Result of a submission attempt.
#[derive(Debug)]
pub enum Submission {
    /// Another request holds the slot. Nothing was started.
    Rejected { reason: DropReason, message: String },
    Completed(PromptResult),
    Pending(AsyncHandle<PromptResult>),
}

impl Submission {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Gate-then-dispatch front door.
#[derive(Debug, Clone)]
pub struct Assistant {
    ctx: Arc<RequestContext>,
    pipeline: RequestPipeline,
    delegation: Option<DelegationOrchestrator>,
}

impl Assistant {
    pub fn new(pipeline: RequestPipeline) -> Self {
        Self {
            ctx: pipeline.context().clone(),
            pipeline,
            delegation: None,
        }
    }

    /// Route submissions through one-hop delegation.
    pub fn with_delegation(mut self) -> Self {
        self.delegation = Some(DelegationOrchestrator::new(Arc::new(self.pipeline.clone())));
        self
    }

    pub fn context(&self) -> &Arc<RequestContext> {
        &self.ctx
    }

    /// Claim the in-flight slot for `source`, then run `request`.
    ///
    /// A rejected claim is reported as [`Submission::Rejected`], not as an
    /// error. Errors are limited to sources failing to produce content; the
    /// claimed slot is released with a failure in that case.
    pub async fn submit(
        &self,
        mut request: PromptRequest,
        source: &str,
        mode: ExecutionMode,
    ) -> Result<Submission> {
        let request_id = match self.ctx.gate().try_claim(self.ctx.phases(), source) {
            Admission::Allowed { request_id } => request_id,
            Admission::Rejected { reason, message } => {
                return Ok(Submission::Rejected { reason, message });
            }
        };
        request.request_id = request_id.clone();

        let submitted = match (mode, &self.delegation) {
            (ExecutionMode::Blocking, Some(delegation)) => {
                delegation.run_request(request).await.map(Submission::Completed)
            }
            (ExecutionMode::Blocking, None) => {
                self.pipeline.run(request).await.map(Submission::Completed)
            }
            (ExecutionMode::Background, Some(delegation)) => {
                let delegation = delegation.clone();
                let phases = self.ctx.phases().clone();
                let owner = request_id.clone();
                Ok(Submission::Pending(self.ctx.dispatcher().start_async(
                    request_id.clone(),
                    async move {
                        let result = delegation.run_request(request).await;
                        if let Err(err) = &result {
                            fail_owned(&phases, owner.as_deref(), &err.to_string());
                        }
                        result
                    },
                )))
            }
            (ExecutionMode::Background, None) => {
                self.pipeline.run_async(request).map(Submission::Pending)
            }
        };

        if let Err(err) = &submitted {
            tracing::warn!(error = %err, source, "submission failed before execution");
            fail_owned(self.ctx.phases(), request_id.as_deref(), &err.to_string());
        }
        submitted
    }

    /// Cancel the in-flight request, if any. Returns whether a cancel was
    /// issued.
    pub fn cancel(&self, source: &str) -> bool {
        let phases = self.ctx.phases();
        let current = phases.current();
        if !current.is_in_flight() {
            return false;
        }
        let state = match current.request_id.as_deref() {
            Some(rid) => match phases.emit_cancel_for(rid) {
                Some(state) => state,
                None => return false,
            },
            None => phases.emit_cancel(),
        };
        if let Some(session) = self.ctx.streaming().current() {
            if Some(session.request_id()) == state.request_id.as_deref() {
                session.cancel_requested(&state, source);
            }
        }
        tracing::debug!(source, request_id = state.request_id.as_deref().unwrap_or(""), "cancel issued");
        true
    }
}

/// Release a claimed slot with a failure, leaving any newer request alone.
fn fail_owned(phases: &PhaseStore, request_id: Option<&str>, error: &str) {
    match request_id {
        Some(rid) => {
            phases.emit_fail_for(rid, error);
        }
        None => {
            phases.emit_fail(error);
        }
    }
}
