//! Write-once outcome handle for background work.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::watch;

use crate::phase::PhaseStore;

/// Why a background job produced no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("background work failed: {0}")]
    Failed(String),
    #[error("background work panicked: {0}")]
    Panicked(String),
}

struct Shared<T> {
    outcome: OnceLock<Result<T, DispatchError>>,
    done: watch::Sender<bool>,
}

/// Handle to work started by [`super::Dispatcher::start_async`].
///
/// The outcome is set exactly once; every clone observes the same value.
pub struct AsyncHandle<T> {
    request_id: Option<String>,
    shared: Arc<Shared<T>>,
    phases: Option<Arc<PhaseStore>>,
}

impl<T> Clone for AsyncHandle<T> {
    fn clone(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            shared: self.shared.clone(),
            phases: self.phases.clone(),
        }
    }
}

impl<T> std::fmt::Debug for AsyncHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncHandle")
            .field("request_id", &self.request_id)
            .field("done", &self.is_done())
            .finish()
    }
}

/// Producer half held by the worker task.
pub(crate) struct Completer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Completer<T> {
    /// Store the outcome. Later calls are ignored.
    pub(crate) fn complete(self, outcome: Result<T, DispatchError>) {
        if self.shared.outcome.set(outcome).is_err() {
            tracing::debug!("async outcome already set");
        }
        self.shared.done.send_replace(true);
    }
}

impl<T> AsyncHandle<T> {
    pub(crate) fn new(
        request_id: Option<String>,
        phases: Option<Arc<PhaseStore>>,
    ) -> (Self, Completer<T>) {
        let (done, _rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            outcome: OnceLock::new(),
            done,
        });
        (
            Self {
                request_id,
                shared: shared.clone(),
                phases,
            },
            Completer { shared },
        )
    }

    /// Handle that is already resolved with `value`.
    pub fn ready(value: T) -> Self {
        let (handle, completer) = Self::new(None, None);
        completer.complete(Ok(value));
        handle
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn is_done(&self) -> bool {
        self.shared.outcome.get().is_some()
    }

    /// Wait for the outcome. Returns `false` if `timeout` elapsed first.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        if self.is_done() {
            return true;
        }
        let mut rx = self.shared.done.subscribe();
        let resolved = async move { rx.wait_for(|done| *done).await.is_ok() };
        match timeout {
            None => resolved.await,
            Some(limit) => tokio::time::timeout(limit, resolved)
                .await
                .unwrap_or(false),
        }
    }

    /// Borrow the value, if the work succeeded.
    pub fn value(&self) -> Option<&T> {
        self.shared.outcome.get().and_then(|o| o.as_ref().ok())
    }

    pub fn error(&self) -> Option<&DispatchError> {
        self.shared.outcome.get().and_then(|o| o.as_ref().err())
    }

    /// Request cooperative cancellation. The worker is never aborted; it
    /// observes the tripped token and settles on its own.
    pub fn cancel(&self) -> bool {
        let Some(phases) = &self.phases else {
            return false;
        };
        let Some(mine) = &self.request_id else {
            phases.emit_cancel();
            return true;
        };
        if phases.emit_cancel_for(mine).is_none() {
            tracing::debug!(request_id = %mine, "cancel for stale handle ignored");
            return false;
        }
        true
    }
}

impl<T: Clone> AsyncHandle<T> {
    /// Copy of the outcome, `None` while still running.
    pub fn result(&self) -> Option<Result<T, DispatchError>> {
        self.shared.outcome.get().cloned()
    }
}
