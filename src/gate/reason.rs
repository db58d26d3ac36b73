//! Drop reason codes and their user-facing messages.

use std::fmt;

/// Machine-readable code explaining why an attempt was refused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DropReason {
    /// Another request already occupies the in-flight slot.
    InFlight,
    /// Any other code, kept verbatim.
    Other(String),
}

impl DropReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::InFlight => "in_flight",
            Self::Other(code) => code.as_str(),
        }
    }

    /// Render the notice shown to the user for this code.
    pub fn message(&self) -> String {
        match self {
            Self::InFlight => {
                "A request is already running; wait for it to finish or cancel it first."
                    .to_string()
            }
            Self::Other(code) => {
                let code = code.trim();
                let code = if code.is_empty() { "unknown" } else { code };
                format!("Request blocked; reason={code}.")
            }
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for DropReason {
    fn from(code: &str) -> Self {
        match code.trim() {
            "in_flight" => Self::InFlight,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for DropReason {
    fn from(code: String) -> Self {
        Self::from(code.as_str())
    }
}

/// Last recorded drop, kept so UI banners can explain a refusal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropRecord {
    pub reason: DropReason,
    pub message: String,
    pub source: String,
}
