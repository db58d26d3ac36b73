//! One-hop delegation on top of the request pipeline.
//!
//! A controller run may answer with a JSON directive asking for one more
//! run. The orchestrator honors at most one directive per top-level call;
//! whatever the delegate returns is final, directive or not.

pub mod directive;

pub use directive::{parse_directive, DelegationDirective, DirectiveAction, ParsedDirective};

use std::sync::Arc;

use crate::error::Result;
use crate::gate::Admission;
use crate::pipeline::{Destination, PromptRequest, PromptResult, PromptRunner, Source};

/// Source name the delegate hop claims the slot under.
pub const DELEGATE_SOURCE: &str = "delegation";

/// Runs a controller prompt and, if it delegates, the delegate prompt.
#[derive(Clone)]
pub struct DelegationOrchestrator {
    runner: Arc<dyn PromptRunner>,
}

impl std::fmt::Debug for DelegationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationOrchestrator").finish_non_exhaustive()
    }
}

impl DelegationOrchestrator {
    pub fn new(runner: Arc<dyn PromptRunner>) -> Self {
        Self { runner }
    }

    pub async fn run(
        &self,
        prompt: &str,
        source: Arc<dyn Source>,
        destination: Destination,
        additional_source: Option<Arc<dyn Source>>,
    ) -> Result<PromptResult> {
        let request = PromptRequest::builder()
            .prompt(prompt)
            .source(source)
            .maybe_additional_source(additional_source)
            .destination(destination)
            .build();
        self.run_request(request).await
    }

    /// Controller run, then at most one delegate run with the same sources.
    ///
    /// The delegate claims the in-flight slot through the runner before it
    /// starts. When another caller took the slot in between, the
    /// controller result is returned as is.
    pub async fn run_request(&self, request: PromptRequest) -> Result<PromptResult> {
        let controller = self.runner.run_prompt(request.clone()).await?;
        if !controller.is_completed() {
            return Ok(controller);
        }

        let Some(directive) = parse_directive(&controller.text()).into_directive() else {
            return Ok(controller);
        };

        let destination = directive.destination_or(controller.destination);
        let request_id = match self.runner.claim_slot(DELEGATE_SOURCE) {
            Admission::Allowed { request_id } => request_id,
            Admission::Rejected { reason, .. } => {
                tracing::debug!(
                    request_id = %controller.request_id,
                    reason = %reason,
                    "delegate hop refused; keeping controller result"
                );
                return Ok(controller);
            }
        };
        tracing::debug!(
            request_id = %controller.request_id,
            delegate_request_id = request_id.as_deref().unwrap_or(""),
            action = %directive.action,
            destination = %destination,
            "delegating once"
        );

        let delegate = PromptRequest {
            prompt: directive.prompt,
            destination: Some(destination),
            request_id,
            ..request
        };
        self.runner.run_prompt(delegate).await
    }
}
