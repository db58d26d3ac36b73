//! Remote model transport seam and the cancellable read loop.

pub mod read_loop;
pub mod timeout;

pub use read_loop::{read_stream, ReadOutcome};
pub use timeout::with_timeout;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Message;

/// Everything a transport needs to perform one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportRequest {
    pub request_id: String,
    pub messages: Vec<Message>,
}

/// Wire-level access to the remote model.
///
/// Implementations own payload format and networking; the pipeline only
/// sees text.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Atomic call returning the whole response.
    async fn complete(&self, request: &TransportRequest) -> Result<String>;

    /// Streaming call yielding text deltas in order.
    async fn stream(
        &self,
        request: &TransportRequest,
    ) -> Result<BoxStream<'static, Result<String>>>;
}
