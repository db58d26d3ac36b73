//! Drains a transport stream into a [`StreamingSession`].

use std::pin::Pin;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::time::{self, Sleep};
use tokio_util::sync::CancellationToken;

use crate::error::{ParleyError, Result};
use crate::streaming::StreamingSession;

/// How a read loop ended.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Stream ended normally; carries the full text.
    Completed(String),
    /// The token was tripped; carries whatever arrived before.
    Cancelled(String),
    /// Transport error or idle timeout, already recorded on the session.
    Failed(ParleyError),
}

impl ReadOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Resolves when the idle timer fires; never when it is disabled.
async fn idle(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Read `stream` until it ends, fails, idles out, or `cancel` trips.
///
/// Every delta goes through `record_chunk`. The token is checked before
/// each chunk so a cancelled request never records further output.
pub async fn read_stream(
    mut stream: BoxStream<'static, Result<String>>,
    session: &StreamingSession,
    cancel: &CancellationToken,
    idle_timeout: Option<Duration>,
) -> ReadOutcome {
    let idle_timeout = idle_timeout.filter(|d| !d.is_zero());
    let mut idle_sleep = idle_timeout.map(|d| Box::pin(time::sleep(d)));

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(request_id = %session.request_id(), "stream read cancelled");
                return ReadOutcome::Cancelled(session.text());
            }
            _ = idle(&mut idle_sleep) => {
                let ms = idle_timeout.map(|d| d.as_millis() as u64).unwrap_or_default();
                let err = ParleyError::Timeout(ms);
                session.record_error(&err.to_string());
                return ReadOutcome::Failed(err);
            }
            delta = stream.next() => {
                let Some(delta) = delta else {
                    session.record_complete();
                    return ReadOutcome::Completed(session.text());
                };
                match delta {
                    Ok(text) => {
                        if let (Some(sleep), Some(d)) = (idle_sleep.as_mut(), idle_timeout) {
                            sleep.as_mut().reset(time::Instant::now() + d);
                        }
                        session.record_chunk(&text);
                    }
                    Err(err) => {
                        session.record_error(&err.to_string());
                        return ReadOutcome::Failed(err);
                    }
                }
            }
        }
    }
}
