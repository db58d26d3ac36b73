//! Delegation directives embedded in model responses.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use crate::pipeline::Destination;

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("code fence regex must compile")
});

/// Directive verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DirectiveAction {
    Delegate,
    CallSelf,
}

/// Request to run the pipeline once more with `prompt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationDirective {
    pub action: DirectiveAction,
    pub prompt: String,
    /// Raw destination name; unknown names fall back to the caller's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_destination: Option<String>,
}

impl DelegationDirective {
    /// Destination for the delegate run.
    pub fn destination_or(&self, fallback: Destination) -> Destination {
        match self.response_destination.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.parse().unwrap_or_else(|_| {
                tracing::debug!(destination = name, "unknown directive destination; keeping caller's");
                fallback
            }),
            _ => fallback,
        }
    }
}

/// Outcome of scanning a response for a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedDirective {
    Directive(DelegationDirective),
    NoDirective,
}

impl ParsedDirective {
    pub fn into_directive(self) -> Option<DelegationDirective> {
        match self {
            Self::Directive(directive) => Some(directive),
            Self::NoDirective => None,
        }
    }
}

/// First JSON object among the trimmed text and each fenced block.
fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let whole = std::iter::once(text.trim());
    let fenced = CODE_FENCE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim());

    whole
        .chain(fenced)
        .filter(|candidate| !candidate.is_empty())
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

/// Scan `text` for a delegation directive.
///
/// Only the first JSON object found is considered. It is a directive when
/// `action` is `delegate` or `call_self` and `prompt` is a non-empty string.
/// Anything else, including malformed JSON, is [`ParsedDirective::NoDirective`].
pub fn parse_directive(text: &str) -> ParsedDirective {
    let Some(payload) = extract_json_object(text) else {
        return ParsedDirective::NoDirective;
    };

    let action = match payload.get("action").and_then(Value::as_str) {
        Some("delegate") => DirectiveAction::Delegate,
        Some("call_self") => DirectiveAction::CallSelf,
        _ => return ParsedDirective::NoDirective,
    };
    let prompt = match payload.get("prompt").and_then(Value::as_str) {
        Some(prompt) if !prompt.trim().is_empty() => prompt.to_string(),
        _ => return ParsedDirective::NoDirective,
    };
    let response_destination = payload
        .get("response_destination")
        .and_then(Value::as_str)
        .map(str::to_string);

    ParsedDirective::Directive(DelegationDirective {
        action,
        prompt,
        response_destination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bare_json_directive() {
        let parsed = parse_directive(r#"{"action": "delegate", "prompt": "Summarize"}"#);
        assert_eq!(
            parsed,
            ParsedDirective::Directive(DelegationDirective {
                action: DirectiveAction::Delegate,
                prompt: "Summarize".into(),
                response_destination: None,
            })
        );
    }

    #[test]
    fn fenced_json_directive_after_prose() {
        let text = "Handing off.\n```json\n{\"action\": \"call_self\", \"prompt\": \"Refine\", \"response_destination\": \"browser\"}\n```";
        let directive = parse_directive(text).into_directive().unwrap();
        assert_eq!(directive.action, DirectiveAction::CallSelf);
        assert_eq!(directive.destination_or(Destination::Paste), Destination::Browser);
    }

    #[test]
    fn plain_fence_is_accepted() {
        let text = "```\n{\"action\": \"delegate\", \"prompt\": \"x\"}\n```";
        assert!(matches!(parse_directive(text), ParsedDirective::Directive(_)));
    }

    #[test]
    fn prose_and_malformed_json_are_not_directives() {
        assert_eq!(parse_directive("Just an answer."), ParsedDirective::NoDirective);
        assert_eq!(parse_directive("```json\n{not json}\n```"), ParsedDirective::NoDirective);
        assert_eq!(parse_directive("[1, 2, 3]"), ParsedDirective::NoDirective);
    }

    #[test]
    fn wrong_action_or_empty_prompt_is_rejected() {
        assert_eq!(
            parse_directive(r#"{"action": "Delegate", "prompt": "x"}"#),
            ParsedDirective::NoDirective
        );
        assert_eq!(
            parse_directive(r#"{"action": "delegate", "prompt": "  "}"#),
            ParsedDirective::NoDirective
        );
        assert_eq!(
            parse_directive(r#"{"action": "delegate", "prompt": 5}"#),
            ParsedDirective::NoDirective
        );
    }

    #[test]
    fn whitespace_only_prompt_is_not_a_directive() {
        assert_eq!(
            parse_directive("{\"action\": \"call_self\", \"prompt\": \"\\n\\t \"}"),
            ParsedDirective::NoDirective
        );
        let padded = parse_directive(r#"{"action": "delegate", "prompt": "  keep me "}"#)
            .into_directive()
            .unwrap();
        assert_eq!(padded.prompt, "  keep me ");
    }

    #[test]
    fn first_object_wins_even_if_not_a_directive() {
        let text = "```json\n{\"note\": 1}\n```\n```json\n{\"action\": \"delegate\", \"prompt\": \"x\"}\n```";
        assert_eq!(parse_directive(text), ParsedDirective::NoDirective);
    }

    #[test]
    fn unknown_destination_falls_back() {
        let directive = DelegationDirective {
            action: DirectiveAction::Delegate,
            prompt: "x".into(),
            response_destination: Some("moon".into()),
        };
        assert_eq!(directive.destination_or(Destination::Clipboard), Destination::Clipboard);
    }
}
