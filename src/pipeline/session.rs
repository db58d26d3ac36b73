//! Preparation and execution of a single request.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::state::{compose_user_message, Source, SystemPromptBuilder};
use super::Destination;
use crate::context::RequestContext;
use crate::dispatch::AsyncHandle;
use crate::error::{ParleyError, Result};
use crate::phase::Phase;
use crate::streaming::{AxisCatalog, HistoryWriter, StreamingSession};
use crate::transport::{read_stream, with_timeout, ReadOutcome, Transport, TransportRequest};
use crate::types::{ContentPart, Message, Role};

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestOutcome {
    Completed,
    Failed { error: String },
    Cancelled,
}

/// Response of one execution. Text is empty unless completed.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub request_id: String,
    pub message: Message,
    pub outcome: RequestOutcome,
}

impl Response {
    fn empty(request_id: String, outcome: RequestOutcome) -> Self {
        Self {
            request_id,
            message: Message::new(Role::Assistant, Vec::new()),
            outcome,
        }
    }

    pub fn text(&self) -> String {
        self.message.text()
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == RequestOutcome::Completed
    }
}

/// Collaborators a session needs besides the shared context.
#[derive(Clone)]
pub(crate) struct SessionDeps {
    pub transport: Arc<dyn Transport>,
    pub prompts: Arc<dyn SystemPromptBuilder>,
    pub history: Option<Arc<dyn HistoryWriter>>,
    pub catalog: Option<Arc<dyn AxisCatalog>>,
}

/// Builds one request and runs it through the transport.
pub struct RequestSession {
    ctx: Arc<RequestContext>,
    deps: SessionDeps,
    destination: Destination,
    request_id: Option<String>,
    axes: BTreeMap<String, Vec<String>>,
    messages: Vec<Message>,
    prepared: bool,
}

impl std::fmt::Debug for RequestSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSession")
            .field("destination", &self.destination)
            .field("request_id", &self.request_id)
            .field("messages", &self.messages.len())
            .field("prepared", &self.prepared)
            .finish()
    }
}

impl RequestSession {
    pub(crate) fn new(ctx: Arc<RequestContext>, deps: SessionDeps, destination: Destination) -> Self {
        Self {
            ctx,
            deps,
            destination,
            request_id: None,
            axes: BTreeMap::new(),
            messages: Vec::new(),
            prepared: false,
        }
    }

    /// Run under a request id already claimed through the gate.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Axes requested for this run; filtered against the catalog on execute.
    pub fn with_axes(mut self, axes: BTreeMap<String, Vec<String>>) -> Self {
        self.axes = axes;
        self
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Populate the request: system prompt, thread history, queued context,
    /// then the user message built from the sources.
    pub fn prepare(
        &mut self,
        prompt: &str,
        source: &dyn Source,
        additional_source: Option<&Arc<dyn Source>>,
    ) -> Result<()> {
        self.begin(false);
        let user = compose_user_message(prompt, source, additional_source)?;

        let system: Vec<ContentPart> = self
            .deps
            .prompts
            .system_messages()
            .into_iter()
            .map(ContentPart::text)
            .collect();
        if !system.is_empty() {
            self.messages.push(Message::new(Role::System, system));
        }

        let thread_enabled = self.ctx.config().thread_enabled;
        let mut conversation = self.ctx.conversation();
        if thread_enabled {
            self.messages.extend(conversation.thread.iter().cloned());
            conversation.push_thread(user.clone());
        }
        self.messages.extend(conversation.query.iter().cloned());
        drop(conversation);

        self.messages.push(user);
        Ok(())
    }

    /// Make sure a request exists. With `reuse_existing`, an already
    /// populated request is kept as is.
    pub fn begin(&mut self, reuse_existing: bool) {
        if reuse_existing && !self.messages.is_empty() {
            self.prepared = true;
            return;
        }
        if !self.prepared {
            self.messages.clear();
            self.prepared = true;
        }
    }

    pub fn add_messages(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.begin(false);
        self.messages.extend(messages);
    }

    /// Record an assistant reply on the thread when thread mode is on.
    pub fn append_thread(&self, message: &Message) {
        if !self.ctx.config().thread_enabled || message.is_empty() {
            return;
        }
        let mut reply = message.clone();
        reply.role = Role::Assistant;
        self.ctx.conversation().push_thread(reply);
    }

    /// Take the in-flight slot for this request, or report a cancellation
    /// that arrived before execution started.
    fn claim(&mut self) -> std::result::Result<String, String> {
        self.begin(false);
        let phases = self.ctx.phases();
        let current = phases.current();

        let Some(rid) = self.request_id.clone() else {
            let rid = phases.emit_begin_send(None);
            self.request_id = Some(rid.clone());
            return Ok(rid);
        };
        if current.request_id.as_deref() == Some(rid.as_str()) {
            if current.cancel_requested {
                return Err(rid);
            }
            if current.phase == Phase::Sending {
                return Ok(rid);
            }
        }
        Ok(phases.emit_begin_send(Some(rid)))
    }

    /// Send the request and wait for the response.
    ///
    /// Transport failures and timeouts are recorded on the streaming session
    /// and yield an empty response; so does cancellation.
    pub async fn execute(&mut self) -> Response {
        match self.claim() {
            Ok(rid) => self.drive(rid).await,
            Err(rid) => self.cancelled_before_start(rid),
        }
    }

    /// Execute on a background task.
    pub fn execute_async(self) -> AsyncHandle<Response> {
        self.execute_async_with(|_, response| response)
    }

    /// Execute on a background task and map the response with `finish`
    /// on that task. The request id is claimed before spawning.
    pub(crate) fn execute_async_with<T, F>(mut self, finish: F) -> AsyncHandle<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&RequestSession, Response) -> T + Send + 'static,
    {
        let ctx = self.ctx.clone();
        match self.claim() {
            Ok(rid) => ctx.dispatcher().start_async(Some(rid.clone()), async move {
                let response = self.drive(rid).await;
                Ok(finish(&self, response))
            }),
            Err(rid) => {
                let response = self.cancelled_before_start(rid);
                AsyncHandle::ready(finish(&self, response))
            }
        }
    }

    fn cancelled_before_start(&self, rid: String) -> Response {
        tracing::debug!(request_id = %rid, "request cancelled before execution");
        let session = self.ctx.streaming().begin(&rid);
        session.record_cancel_executed("pipeline", false);
        Response::empty(rid, RequestOutcome::Cancelled)
    }

    async fn drive(&mut self, rid: String) -> Response {
        let phases = self.ctx.phases().clone();
        let config = self.ctx.config().clone();
        let Some(token) = phases.cancellation_for(&rid) else {
            if phases.current().request_id.as_deref() == Some(rid.as_str()) {
                return self.cancelled_before_start(rid);
            }
            tracing::debug!(request_id = %rid, "request superseded before execution");
            return Response::empty(rid, RequestOutcome::Cancelled);
        };
        let session = self.ctx.streaming().begin_owned(&rid, &phases);
        if let Some(catalog) = &self.deps.catalog {
            if !self.axes.is_empty() {
                session.set_axes_from_request(&self.axes, catalog.as_ref());
            }
        }

        let request = TransportRequest {
            request_id: rid.clone(),
            messages: self.messages.clone(),
        };

        let outcome = if config.streaming {
            let opened = tokio::select! {
                biased;
                _ = token.cancelled() => Err(ParleyError::Cancelled),
                opened = with_timeout(config.request_timeout(), self.deps.transport.stream(&request)) => opened,
            };
            match opened {
                Ok(stream) if phases.emit_begin_stream_for(&rid) => {
                    read_stream(stream, &session, &token, config.stream_idle_timeout()).await
                }
                Ok(_) => ReadOutcome::Cancelled(String::new()),
                Err(ParleyError::Cancelled) => ReadOutcome::Cancelled(String::new()),
                Err(err) => {
                    session.record_error(&err.to_string());
                    ReadOutcome::Failed(err)
                }
            }
        } else {
            let completed = tokio::select! {
                biased;
                _ = token.cancelled() => Err(ParleyError::Cancelled),
                text = with_timeout(config.request_timeout(), self.deps.transport.complete(&request)) => text,
            };
            match completed {
                Ok(text) => {
                    session.record_chunk(&text);
                    session.record_complete();
                    ReadOutcome::Completed(session.text())
                }
                Err(ParleyError::Cancelled) => ReadOutcome::Cancelled(String::new()),
                Err(err) => {
                    session.record_error(&err.to_string());
                    ReadOutcome::Failed(err)
                }
            }
        };

        self.finish(rid, &session, outcome)
    }

    fn finish(&self, rid: String, session: &StreamingSession, outcome: ReadOutcome) -> Response {
        let phases = self.ctx.phases();
        match outcome {
            ReadOutcome::Completed(text) => {
                let text = text.trim().to_string();
                if phases.emit_complete_for(&rid).is_none() {
                    tracing::debug!(request_id = %rid, "completion after cancel dropped");
                    session.record_cancel_executed("pipeline", true);
                    return Response::empty(rid, RequestOutcome::Cancelled);
                }
                self.ctx.conversation().last_response = text.clone();
                if let Some(history) = &self.deps.history {
                    session.record_log_entry(history.as_ref());
                }
                tracing::debug!(request_id = %rid, chars = text.len(), "request completed");
                Response {
                    request_id: rid,
                    message: Message::assistant(text),
                    outcome: RequestOutcome::Completed,
                }
            }
            ReadOutcome::Cancelled(_) => {
                phases.emit_cancel_for(&rid);
                session.record_cancel_executed("pipeline", true);
                tracing::debug!(request_id = %rid, "request cancelled");
                Response::empty(rid, RequestOutcome::Cancelled)
            }
            ReadOutcome::Failed(err) => {
                phases.emit_fail_for(&rid, err.to_string());
                tracing::debug!(request_id = %rid, error = %err, "request failed");
                Response::empty(
                    rid,
                    RequestOutcome::Failed {
                        error: err.to_string(),
                    },
                )
            }
        }
    }
}
