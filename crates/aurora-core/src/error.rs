use std::fmt;

use thiserror::Error;

use crate::gate::Gate;

/// One of the four human actions that can be dispatched to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    StartThread,
    AnswerMissingInfo,
    DecideApproval,
    DecideSecurity,
}

impl UserAction {
    pub fn describe(&self) -> &'static str {
        match self {
            UserAction::StartThread => "thread start",
            UserAction::AnswerMissingInfo => "missing-info answer",
            UserAction::DecideApproval => "approval decision",
            UserAction::DecideSecurity => "security decision",
        }
    }
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("workflow thread could not be created: {0}")]
    SessionCreation(String),
    #[error("{action} failed: {reason}")]
    ActionDispatch { action: UserAction, reason: String },
    #[error("{action} is not valid while the active gate is {gate}")]
    InvalidGateAction { action: UserAction, gate: Gate },
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_gate_message_names_action_and_gate() {
        let err = ClientError::InvalidGateAction {
            action: UserAction::DecideApproval,
            gate: Gate::MissingInfo,
        };
        assert_eq!(
            err.to_string(),
            "approval decision is not valid while the active gate is missing-info"
        );
    }

    #[test]
    fn test_dispatch_message_carries_reason() {
        let err = ClientError::ActionDispatch {
            action: UserAction::DecideSecurity,
            reason: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "security decision failed: connection refused");
    }
}
