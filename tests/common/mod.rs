//! Shared test helpers: scripted transport, recording collaborators.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::Notify;

use parley::config::ParleyConfig;
use parley::context::RequestContext;
use parley::dispatch::{DispatchError, Presenter};
use parley::error::{ParleyError, Result};
use parley::pipeline::{
    PromptRequest, PromptResult, RequestPipeline, Source, StaticSystemPrompt, TextSource,
};
use parley::streaming::{AxisCatalog, HistoryWriter, LogEntryRequest};
use parley::transport::{Transport, TransportRequest};

/// What the transport does for one call.
#[derive(Clone)]
pub enum Reply {
    /// Emit these chunks, then end.
    Chunks(Vec<String>),
    /// Emit these chunks, then fail with a transport error.
    FailAfter(Vec<String>, String),
    /// Never produce anything.
    Hang,
    /// Wait for the notify, then emit the chunks.
    WaitThen(Arc<Notify>, Vec<String>),
    /// Fail before any output.
    OpenError(String),
}

impl Reply {
    pub fn text(chunks: &[&str]) -> Self {
        Self::Chunks(chunks.iter().map(|c| c.to_string()).collect())
    }
}

/// Transport that replays queued replies and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn push_text(&self, chunks: &[&str]) {
        self.push(Reply::text(chunks));
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next(&self, request: &TransportRequest) -> Reply {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::text(&["Mock response"]))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn complete(&self, request: &TransportRequest) -> Result<String> {
        match self.next(request) {
            Reply::Chunks(chunks) => Ok(chunks.concat()),
            Reply::FailAfter(_, message) | Reply::OpenError(message) => {
                Err(ParleyError::transport(message))
            }
            Reply::Hang => std::future::pending().await,
            Reply::WaitThen(notify, chunks) => {
                notify.notified().await;
                Ok(chunks.concat())
            }
        }
    }

    async fn stream(
        &self,
        request: &TransportRequest,
    ) -> Result<BoxStream<'static, Result<String>>> {
        match self.next(request) {
            Reply::Chunks(chunks) => Ok(stream::iter(chunks.into_iter().map(Ok)).boxed()),
            Reply::FailAfter(chunks, message) => Ok(stream::iter(
                chunks
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(ParleyError::transport(message)))),
            )
            .boxed()),
            Reply::Hang => Ok(stream::pending().boxed()),
            Reply::WaitThen(notify, chunks) => Ok(async_stream::stream! {
                notify.notified().await;
                for chunk in chunks {
                    yield Ok(chunk);
                }
            }
            .boxed()),
            Reply::OpenError(message) => Err(ParleyError::transport(message)),
        }
    }
}

/// Presenter that remembers what it was given.
#[derive(Default)]
pub struct RecordingPresenter {
    pub shown: Mutex<Vec<String>>,
    pub failures: Mutex<Vec<DispatchError>>,
}

impl Presenter<PromptResult> for RecordingPresenter {
    fn present(&self, value: &PromptResult) {
        self.shown.lock().unwrap().push(value.text());
    }

    fn present_failure(&self, error: &DispatchError) {
        self.failures.lock().unwrap().push(error.clone());
    }
}

/// Catalog with a fixed set of axes.
pub struct FakeCatalog(pub BTreeMap<String, BTreeSet<String>>);

impl FakeCatalog {
    pub fn standard() -> Arc<Self> {
        let mut axes = BTreeMap::new();
        axes.insert(
            "scope".to_string(),
            ["focus", "bound", "narrow"].iter().map(|s| s.to_string()).collect(),
        );
        axes.insert(
            "directional".to_string(),
            ["fog", "jog", "rog"].iter().map(|s| s.to_string()).collect(),
        );
        Arc::new(Self(axes))
    }
}

impl AxisCatalog for FakeCatalog {
    fn axis_tokens(&self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        Ok(self.0.clone())
    }
}

/// History writer that keeps entries in memory.
#[derive(Default)]
pub struct MemoryHistory {
    pub entries: Mutex<Vec<LogEntryRequest>>,
}

impl HistoryWriter for MemoryHistory {
    fn append_entry(&self, entry: &LogEntryRequest) -> Result<String> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(entry.text.clone())
    }
}

pub struct Harness {
    pub ctx: Arc<RequestContext>,
    pub transport: Arc<ScriptedTransport>,
    pub pipeline: RequestPipeline,
}

pub fn harness(config: ParleyConfig) -> Harness {
    harness_with_prompt(config, &[])
}

pub fn harness_with_prompt(config: ParleyConfig, system: &[&str]) -> Harness {
    let ctx = RequestContext::new(config);
    let transport = ScriptedTransport::new();
    let prompts = StaticSystemPrompt(system.iter().map(|s| s.to_string()).collect());
    let pipeline = RequestPipeline::new(ctx.clone(), transport.clone(), Arc::new(prompts));
    Harness {
        ctx,
        transport,
        pipeline,
    }
}

pub fn text_source(text: &str) -> Arc<dyn Source> {
    Arc::new(TextSource::new(text))
}

pub fn request(prompt: &str) -> PromptRequest {
    PromptRequest::builder()
        .prompt(prompt)
        .source(text_source("selected text"))
        .build()
}
