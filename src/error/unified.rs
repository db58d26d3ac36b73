//! Error classification and recovery hints.

use serde::{Deserialize, Serialize};

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Admission,
    Transport,
    Timeout,
    Cancellation,
    Dependency,
    Configuration,
    Serialization,
    Unknown,
}

/// Suggested recovery action, suitable for a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Another request owns the in-flight slot.
    WaitForCurrentRequest,
    RetryWithBackoff,
    IncreaseTimeout,
    CheckConfiguration,
    /// Nothing to do; the outcome is expected (e.g. cancellation).
    None,
}
