//! Background execution of request work.

pub mod handle;

pub use handle::{AsyncHandle, DispatchError};

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::phase::PhaseStore;

/// Presentation side effect run once a background request resolves.
pub trait Presenter<T>: Send + Sync {
    fn present(&self, value: &T);

    fn present_failure(&self, error: &DispatchError) {
        tracing::warn!(error = %error, "background request produced no result");
    }
}

/// Spawns request work onto the tokio runtime.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    phases: Arc<PhaseStore>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Dispatcher {
    pub fn new(phases: Arc<PhaseStore>) -> Self {
        Self { phases }
    }

    /// Run `work` on a new task and return a handle to its outcome.
    ///
    /// A panic inside `work` resolves the handle with
    /// [`DispatchError::Panicked`] instead of unwinding into the runtime.
    pub fn start_async<T, F>(&self, request_id: Option<String>, work: F) -> AsyncHandle<T>
    where
        T: Send + Sync + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (handle, completer) = AsyncHandle::new(request_id.clone(), Some(self.phases.clone()));
        let label = request_id.unwrap_or_default();
        tracing::debug!(request_id = %label, "dispatch start");

        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(DispatchError::Failed(err.to_string())),
                Err(payload) => Err(DispatchError::Panicked(panic_message(payload.as_ref()))),
            };
            tracing::debug!(request_id = %label, ok = outcome.is_ok(), "dispatch finish");
            completer.complete(outcome);
        });
        handle
    }

    /// Wait for `handle` on a separate task, then hand the outcome to
    /// `presenter`.
    pub fn present_when_done<T, P>(&self, handle: AsyncHandle<T>, presenter: Arc<P>) -> JoinHandle<()>
    where
        T: Send + Sync + 'static,
        P: Presenter<T> + ?Sized + 'static,
    {
        tokio::spawn(async move {
            handle.wait(None).await;
            if let Some(value) = handle.value() {
                presenter.present(value);
            } else if let Some(error) = handle.error() {
                presenter.present_failure(error);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParleyError;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        values: Mutex<Vec<String>>,
        failures: Mutex<Vec<DispatchError>>,
    }

    impl Presenter<String> for Recording {
        fn present(&self, value: &String) {
            self.values.lock().unwrap().push(value.clone());
        }

        fn present_failure(&self, error: &DispatchError) {
            self.failures.lock().unwrap().push(error.clone());
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(PhaseStore::new()))
    }

    #[tokio::test]
    async fn start_async_resolves_value() {
        let handle = dispatcher().start_async(Some("req-1".into()), async { Ok(41 + 1) });
        assert!(handle.wait(Some(Duration::from_secs(1))).await);
        assert_eq!(handle.result(), Some(Ok(42)));
        assert_eq!(handle.request_id(), Some("req-1"));
    }

    #[tokio::test]
    async fn errors_become_failed() {
        let handle = dispatcher().start_async::<u8, _>(None, async {
            Err(ParleyError::transport("reset"))
        });
        handle.wait(None).await;
        assert!(matches!(handle.error(), Some(DispatchError::Failed(msg)) if msg.contains("reset")));
    }

    #[tokio::test]
    async fn panics_are_captured() {
        let handle = dispatcher().start_async::<u8, _>(None, async {
            if true {
                panic!("kaboom");
            }
            Ok(0)
        });
        assert!(handle.wait(Some(Duration::from_secs(1))).await);
        assert_eq!(
            handle.result(),
            Some(Err(DispatchError::Panicked("kaboom".into())))
        );
    }

    #[tokio::test]
    async fn present_when_done_runs_presenter() {
        let d = dispatcher();
        let presenter = Arc::new(Recording::default());

        let ok = d.start_async(None, async { Ok("done".to_string()) });
        d.present_when_done(ok, presenter.clone()).await.unwrap();

        let failed = d.start_async::<String, _>(None, async { Err(ParleyError::Cancelled) });
        d.present_when_done(failed, presenter.clone()).await.unwrap();

        assert_eq!(*presenter.values.lock().unwrap(), vec!["done".to_string()]);
        assert_eq!(presenter.failures.lock().unwrap().len(), 1);
    }
}
