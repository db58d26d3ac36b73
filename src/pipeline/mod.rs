//! Request pipeline: prepare a prompt, execute it, package the result.
//!
//! [`RequestPipeline`] is the facade used by the assistant and the
//! delegation orchestrator. Each run builds a fresh [`RequestSession`].

pub mod destination;
pub mod session;
pub mod state;

pub use destination::{render_for_destination, Destination, ResponsePresentation};
pub use session::{RequestOutcome, RequestSession, Response};
pub use state::{RequestState, Source, StaticSystemPrompt, SystemPromptBuilder, TextSource};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bon::Builder;

use crate::context::RequestContext;
use crate::dispatch::AsyncHandle;
use crate::error::Result;
use crate::gate::Admission;
use crate::streaming::{AxisCatalog, HistoryWriter};
use crate::transport::Transport;
use crate::types::Message;
use session::SessionDeps;

/// Inputs for one prompt run.
#[derive(Clone, Builder)]
pub struct PromptRequest {
    #[builder(into)]
    pub prompt: String,
    pub source: Arc<dyn Source>,
    pub additional_source: Option<Arc<dyn Source>>,
    /// Falls back to the configured default destination when unset.
    pub destination: Option<Destination>,
    /// Id claimed through the gate, if any.
    #[builder(into)]
    pub request_id: Option<String>,
    #[builder(default)]
    pub axes: BTreeMap<String, Vec<String>>,
}

impl std::fmt::Debug for PromptRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRequest")
            .field("prompt", &self.prompt)
            .field("destination", &self.destination)
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// Result of a run, with presentation helpers.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptResult {
    pub request_id: String,
    pub messages: Vec<Message>,
    pub outcome: RequestOutcome,
    pub destination: Destination,
}

impl PromptResult {
    pub fn from_response(response: Response, destination: Destination) -> Self {
        Self {
            request_id: response.request_id,
            messages: vec![response.message],
            outcome: response.outcome,
            destination,
        }
    }

    /// Text of the first message, empty when there is none.
    pub fn text(&self) -> String {
        self.messages.first().map(Message::text).unwrap_or_default()
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == RequestOutcome::Completed
    }

    pub fn presentation_for(&self, destination: Destination) -> ResponsePresentation {
        render_for_destination(&self.text(), destination)
    }
}

/// Anything that can run a prompt to completion.
#[async_trait]
pub trait PromptRunner: Send + Sync {
    async fn run_prompt(&self, request: PromptRequest) -> Result<PromptResult>;

    /// Take the in-flight slot for a follow-up run on behalf of `source`.
    /// Runners without a gate always allow and leave the id to
    /// [`run_prompt`](Self::run_prompt).
    fn claim_slot(&self, _source: &str) -> Admission {
        Admission::Allowed { request_id: None }
    }
}

/// Facade over [`RequestSession`].
#[derive(Clone)]
pub struct RequestPipeline {
    ctx: Arc<RequestContext>,
    deps: SessionDeps,
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("history", &self.deps.history.is_some())
            .field("catalog", &self.deps.catalog.is_some())
            .finish()
    }
}

impl RequestPipeline {
    pub fn new(
        ctx: Arc<RequestContext>,
        transport: Arc<dyn Transport>,
        prompts: Arc<dyn SystemPromptBuilder>,
    ) -> Self {
        Self {
            ctx,
            deps: SessionDeps {
                transport,
                prompts,
                history: None,
                catalog: None,
            },
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryWriter>) -> Self {
        self.deps.history = Some(history);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn AxisCatalog>) -> Self {
        self.deps.catalog = Some(catalog);
        self
    }

    pub fn context(&self) -> &Arc<RequestContext> {
        &self.ctx
    }

    pub fn session(&self, destination: Destination) -> RequestSession {
        RequestSession::new(self.ctx.clone(), self.deps.clone(), destination)
    }

    fn prepared(&self, request: &PromptRequest) -> Result<RequestSession> {
        let destination = request
            .destination
            .unwrap_or(self.ctx.config().default_destination);
        let mut session = self.session(destination).with_axes(request.axes.clone());
        if let Some(rid) = &request.request_id {
            session = session.with_request_id(rid.clone());
        }
        session.prepare(
            &request.prompt,
            request.source.as_ref(),
            request.additional_source.as_ref(),
        )?;
        Ok(session)
    }

    /// Prepare, execute and package on the calling task.
    ///
    /// Fails only when a source cannot produce content.
    pub async fn run(&self, request: PromptRequest) -> Result<PromptResult> {
        let mut session = self.prepared(&request)?;
        let response = session.execute().await;
        Ok(Self::complete(&session, response))
    }

    /// Prepare now, execute on a background task.
    pub fn run_async(&self, request: PromptRequest) -> Result<AsyncHandle<PromptResult>> {
        let session = self.prepared(&request)?;
        Ok(session.execute_async_with(Self::complete))
    }

    fn complete(session: &RequestSession, response: Response) -> PromptResult {
        if response.is_completed() {
            session.append_thread(&response.message);
        }
        PromptResult::from_response(response, session.destination())
    }
}

#[async_trait]
impl PromptRunner for RequestPipeline {
    async fn run_prompt(&self, request: PromptRequest) -> Result<PromptResult> {
        self.run(request).await
    }

    fn claim_slot(&self, source: &str) -> Admission {
        self.ctx.gate().try_claim(self.ctx.phases(), source)
    }
}
