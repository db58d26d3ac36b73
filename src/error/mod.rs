//! Error types for Parley.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all Parley operations.
#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Request rejected ({reason}): {message}")]
    AdmissionRejected { reason: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl ParleyError {
    /// Create a transport error from any displayable cause.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AdmissionRejected { .. } => ErrorCategory::Admission,
            Self::Transport(_) => ErrorCategory::Transport,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::DependencyUnavailable(_) => ErrorCategory::Dependency,
            Self::Configuration(_) | Self::Toml(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Io(_) | Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether retrying the same request could succeed.
    ///
    /// Retries themselves belong to the transport; this only classifies.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport | ErrorCategory::Timeout
        )
    }

    /// Cancellation is a terminal outcome rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Admission => RecoverySuggestion::WaitForCurrentRequest,
            ErrorCategory::Transport => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Cancellation => RecoverySuggestion::None,
            _ => RecoverySuggestion::RetryWithBackoff,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ParleyError>;
