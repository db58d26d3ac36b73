//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::{ParleyError, Result};

/// Wrap a future with a timeout. A zero duration disables it.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    if duration.is_zero() {
        return future.await;
    }
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ParleyError::Timeout(duration.as_millis() as u64)),
    }
}
