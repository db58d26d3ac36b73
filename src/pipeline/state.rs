//! Conversation state and prompt-building collaborators.

use std::sync::Arc;

use crate::error::Result;
use crate::types::{ContentPart, Message};

/// Conversation-level state that outlives a single request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestState {
    /// Running thread, used when thread mode is on.
    pub thread: Vec<Message>,
    /// Queued prior context prepended to the next request.
    pub query: Vec<Message>,
    /// Last completed response text.
    pub last_response: String,
}

impl RequestState {
    pub fn push_thread(&mut self, message: Message) {
        self.thread.push(message);
    }

    pub fn clear_thread(&mut self) {
        self.thread.clear();
    }

    pub fn queue(&mut self, message: Message) {
        self.query.push(message);
    }
}

/// Supplies input content (selected text, clipboard, a prior response...).
pub trait Source: Send + Sync {
    fn content(&self) -> Result<Vec<ContentPart>>;
}

/// Plain text source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextSource(pub String);

impl TextSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }
}

impl Source for TextSource {
    fn content(&self) -> Result<Vec<ContentPart>> {
        if self.0.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![ContentPart::text(self.0.clone())])
    }
}

/// Builds the system prompt lines for each request.
pub trait SystemPromptBuilder: Send + Sync {
    fn system_messages(&self) -> Vec<String>;
}

/// Fixed system prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticSystemPrompt(pub Vec<String>);

impl SystemPromptBuilder for StaticSystemPrompt {
    fn system_messages(&self) -> Vec<String> {
        self.0.clone()
    }
}

/// Compose the user message: prompt first, then the primary source, then
/// the secondary one. Empty parts are skipped.
pub fn compose_user_message(
    prompt: &str,
    source: &dyn Source,
    additional: Option<&Arc<dyn Source>>,
) -> Result<Message> {
    let mut parts = vec![ContentPart::text(prompt)];
    parts.extend(source.content()?);
    if let Some(extra) = additional {
        parts.extend(extra.content()?);
    }
    parts.retain(|part| !part.is_empty());
    Ok(Message::new(crate::types::Role::User, parts))
}
