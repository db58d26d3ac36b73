//! Parley: single-flight request lifecycle core for conversational
//! assistants.
//!
//! One logical request may be in flight at a time. The pieces, leaves
//! first:
//!
//! - [`phase`]: the current [`phase::PhaseState`], its pure transition and
//!   the coarser lifecycle reducer, owned by a [`phase::PhaseStore`].
//! - [`gate`]: [`gate::AdmissionGate`] refuses overlapping starts and keeps
//!   drop statistics.
//! - [`streaming`]: per-attempt [`streaming::StreamingSession`] with an
//!   ordered event log and an observable snapshot slot.
//! - [`dispatch`]: background execution behind [`dispatch::AsyncHandle`].
//! - [`transport`]: the remote-model seam and the cancellable read loop.
//! - [`pipeline`]: prepare, execute and package a prompt.
//! - [`delegation`]: one-hop delegation driven by JSON directives.
//! - [`assistant`]: gate-then-run entry point.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use parley::prelude::*;
//!
//! # async fn example(transport: Arc<dyn Transport>) -> parley::error::Result<()> {
//! let ctx = RequestContext::new(ParleyConfig::from_env()?);
//! let pipeline = RequestPipeline::new(ctx, transport, Arc::new(StaticSystemPrompt::default()));
//! let assistant = Assistant::new(pipeline).with_delegation();
//!
//! let request = PromptRequest::builder()
//!     .prompt("Summarize this")
//!     .source(Arc::new(TextSource::new("...")))
//!     .build();
//! match assistant.submit(request, "hotkey", ExecutionMode::Blocking).await? {
//!     Submission::Completed(result) => println!("{}", result.text()),
//!     Submission::Rejected { message, .. } => eprintln!("{message}"),
//!     Submission::Pending(_) => unreachable!(),
//! }
//! # Ok(())
//! # }
//! ```

pub mod assistant;
pub mod config;
pub mod context;
pub mod delegation;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod phase;
pub mod pipeline;
pub mod prelude;
pub mod streaming;
pub mod telemetry;
pub mod transport;
pub mod types;
