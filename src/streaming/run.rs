//! In-memory accumulator for one streamed response.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Chunks, status flags, axes and gating counters for a single attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingRun {
    pub request_id: String,
    pub chunks: Vec<String>,
    pub completed: bool,
    pub errored: bool,
    pub error_message: String,
    pub axes: BTreeMap<String, Vec<String>>,
    pub gating_drop_counts: BTreeMap<String, u64>,
    pub gating_drop_sources: BTreeMap<String, u64>,
    pub gating_drop_last: Option<String>,
}

impl StreamingRun {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Default::default()
        }
    }

    /// Append a chunk. Returns whether it was kept.
    ///
    /// Chunks after an error and whitespace-only chunks are dropped.
    pub fn on_chunk(&mut self, text: &str) -> bool {
        if self.errored || text.trim().is_empty() {
            return false;
        }
        self.chunks.push(text.to_string());
        true
    }

    /// Mark completed unless an error was already recorded.
    pub fn on_complete(&mut self) -> bool {
        if self.errored {
            return false;
        }
        self.completed = true;
        true
    }

    /// Mark errored. Accumulated chunks are kept for partial rendering.
    pub fn on_error(&mut self, message: &str) {
        self.errored = true;
        self.completed = false;
        self.error_message = message.to_string();
    }

    pub fn on_gating_drop(&mut self, reason: &str, source: &str) {
        *self.gating_drop_counts.entry(reason.to_string()).or_default() += 1;
        *self.gating_drop_sources.entry(source.to_string()).or_default() += 1;
        self.gating_drop_last = Some(reason.to_string());
    }

    pub fn text(&self) -> String {
        self.chunks.concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_concatenate_in_order() {
        let mut run = StreamingRun::new("req-1");
        assert!(run.on_chunk("Hello "));
        assert!(run.on_chunk("world"));
        assert_eq!(run.text(), "Hello world");
    }

    #[test]
    fn blank_chunks_are_ignored() {
        let mut run = StreamingRun::new("req-1");
        assert!(!run.on_chunk(""));
        assert!(!run.on_chunk("  \n\t"));
        assert!(run.chunks.is_empty());
    }

    #[test]
    fn error_is_sticky() {
        let mut run = StreamingRun::new("req-1");
        run.on_chunk("partial");
        run.on_error("boom");
        assert!(!run.on_chunk("more"));
        assert!(!run.on_complete());
        assert_eq!(run.text(), "partial");
        assert!(run.errored);
        assert!(!run.completed);
        assert_eq!(run.error_message, "boom");
    }

    #[test]
    fn error_after_complete_clears_completed() {
        let mut run = StreamingRun::new("req-1");
        run.on_complete();
        run.on_error("late");
        assert!(!run.completed);
    }
}
