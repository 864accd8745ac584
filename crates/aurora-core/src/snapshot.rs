//! Wire types for one workflow thread's remote state.
//!
//! These structures mirror the backend's JSON exactly. The client never
//! mutates a snapshot; every poll replaces the previous one wholesale.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque server-assigned identifier for one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The sender of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry as the backend reports it (may be an
/// internal-control payload, see the `transcript` module).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Severity reported by the backend's security scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

impl Severity {
    /// Parses the backend's severity token. Unknown or empty tokens read as
    /// `None`; the free-text report still carries the detail.
    pub fn parse(token: &str) -> Self {
        match token.trim().to_lowercase().as_str() {
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            _ => Severity::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative remote state for a thread. All fields default so the
/// backend can omit anything that is empty at the current workflow stage
/// (`missing_question` only appears once that gate opens, the config map is
/// absent until generation completes, and so on).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub terraform_config: BTreeMap<String, String>,
    #[serde(default)]
    pub next_action: String,
    #[serde(default)]
    pub waiting_for_approval: bool,
    #[serde(default)]
    pub waiting_for_missing_info: bool,
    #[serde(default)]
    pub waiting_for_security_review: bool,
    #[serde(default)]
    pub missing_question: String,
    #[serde(default)]
    pub security_severity: String,
    #[serde(default)]
    pub security_issues: String,
}

impl WorkflowSnapshot {
    /// `next_action` value that marks the workflow as finished.
    pub const TERMINAL_ACTION: &'static str = "end";

    pub fn severity(&self) -> Severity {
        Severity::parse(&self.security_severity)
    }

    pub fn has_config(&self) -> bool {
        !self.terraform_config.is_empty()
    }
}
