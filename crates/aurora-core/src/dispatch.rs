//! Sends the four human actions to the backend, with fail-fast gate
//! validation and the error taxonomy the rest of the client relies on.
//!
//! Dispatching never touches session state; the session controller owns the
//! busy flag and triggers the immediate follow-up snapshot refresh once a
//! dispatch settles.

use std::sync::Arc;

use crate::api::{SecurityAction, WorkflowApi};
use crate::error::{ClientError, ClientResult, UserAction};
use crate::gate::Gate;
use crate::snapshot::ThreadId;

#[derive(Clone)]
pub struct ActionDispatcher {
    api: Arc<dyn WorkflowApi>,
}

impl ActionDispatcher {
    pub fn new(api: Arc<dyn WorkflowApi>) -> Self {
        Self { api }
    }

    /// Creates a new thread from the first user message. On failure no
    /// thread exists; the caller decides what happens to its optimistic
    /// transcript entry.
    pub async fn start_thread(&self, text: &str) -> ClientResult<ThreadId> {
        self.api
            .start_thread(text)
            .await
            .map_err(|err| ClientError::SessionCreation(err.to_string()))
    }

    /// Valid only while the missing-info gate is open; calling it otherwise
    /// is a programmer error and fails before any network traffic.
    pub async fn answer_missing_info(
        &self,
        thread: &ThreadId,
        gate: Gate,
        answer: &str,
    ) -> ClientResult<()> {
        require_gate(UserAction::AnswerMissingInfo, gate, Gate::MissingInfo)?;
        self.api
            .answer_missing_info(thread, answer)
            .await
            .map_err(|err| dispatch_error(UserAction::AnswerMissingInfo, err))
    }

    pub async fn decide_approval(
        &self,
        thread: &ThreadId,
        gate: Gate,
        approved: bool,
        feedback: Option<&str>,
    ) -> ClientResult<()> {
        require_gate(UserAction::DecideApproval, gate, Gate::Approval)?;
        self.api
            .decide_approval(thread, approved, feedback)
            .await
            .map_err(|err| dispatch_error(UserAction::DecideApproval, err))
    }

    pub async fn decide_security(
        &self,
        thread: &ThreadId,
        gate: Gate,
        action: SecurityAction,
    ) -> ClientResult<()> {
        require_gate(UserAction::DecideSecurity, gate, Gate::SecurityReview)?;
        self.api
            .decide_security(thread, action)
            .await
            .map_err(|err| dispatch_error(UserAction::DecideSecurity, err))
    }
}

fn require_gate(action: UserAction, actual: Gate, expected: Gate) -> ClientResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(ClientError::InvalidGateAction {
            action,
            gate: actual,
        })
    }
}

fn dispatch_error(action: UserAction, err: ClientError) -> ClientError {
    ClientError::ActionDispatch {
        action,
        reason: err.to_string(),
    }
}
