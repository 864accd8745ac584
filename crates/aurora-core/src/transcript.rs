//! Separates human-readable transcript entries from machine-control
//! payloads that the workflow passes through the message history.

use crate::snapshot::{ChatMessage, WorkflowSnapshot};

/// True when `content` is an internal-control payload that should be hidden
/// from the human-facing transcript.
///
/// Two cases, deliberately asymmetric:
/// - brace-delimited content must parse as valid JSON to be hidden;
/// - fenced content is hidden as soon as it carries a brace pair. The
///   interior is NOT validated, so a legitimate code fence that happens to
///   contain `{` and `}` is hidden too. Known trade-off, kept for
///   compatibility with the backend's message conventions.
pub fn is_internal_payload(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return serde_json::from_str::<serde_json::Value>(trimmed).is_ok();
    }
    trimmed.starts_with("```")
        && trimmed.ends_with("```")
        && trimmed.contains('{')
        && trimmed.contains('}')
}

/// Derives the human-facing transcript from a snapshot. The result is built
/// fresh on every call; nothing is merged with previous state.
pub fn visible_messages(snapshot: &WorkflowSnapshot) -> Vec<ChatMessage> {
    snapshot
        .messages
        .iter()
        .filter(|message| !is_internal_payload(&message.content))
        .cloned()
        .collect()
}
