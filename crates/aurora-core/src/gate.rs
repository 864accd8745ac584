//! Derives which human-input gate (if any) a snapshot has opened, and
//! whether the input controls should be offered at all.

use std::fmt;

use crate::snapshot::WorkflowSnapshot;

/// A point where the workflow pauses for a specific human decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    None,
    MissingInfo,
    Approval,
    SecurityReview,
}

impl Gate {
    pub fn is_open(&self) -> bool {
        !matches!(self, Gate::None)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Gate::None => "none",
            Gate::MissingInfo => "missing-info",
            Gate::Approval => "approval",
            Gate::SecurityReview => "security-review",
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The backend is expected to raise at most one flag at a time. If several
/// are set anyway, precedence is security review, then approval, then
/// missing info, so the degenerate case stays deterministic.
pub fn active_gate(snapshot: &WorkflowSnapshot) -> Gate {
    if snapshot.waiting_for_security_review {
        Gate::SecurityReview
    } else if snapshot.waiting_for_approval {
        Gate::Approval
    } else if snapshot.waiting_for_missing_info {
        Gate::MissingInfo
    } else {
        Gate::None
    }
}

/// Terminal means the workflow declared itself done AND nothing is pending
/// on the human. An open gate keeps the session live regardless of
/// `next_action`.
pub fn is_terminal(snapshot: &WorkflowSnapshot) -> bool {
    snapshot.next_action == WorkflowSnapshot::TERMINAL_ACTION && !active_gate(snapshot).is_open()
}

/// Whether the text input should accept typing: always in a fresh session,
/// after the workflow finished, or while a gate expects something from the
/// human. Disabled while the backend is computing with nothing expected.
pub fn input_enabled(snapshot: Option<&WorkflowSnapshot>, has_thread: bool) -> bool {
    if !has_thread {
        return true;
    }
    match snapshot {
        Some(snapshot) => is_terminal(snapshot) || active_gate(snapshot).is_open(),
        None => false,
    }
}

/// Whether a send should actually be offered for `pending` text.
pub fn send_enabled(
    snapshot: Option<&WorkflowSnapshot>,
    has_thread: bool,
    busy: bool,
    pending: &str,
) -> bool {
    input_enabled(snapshot, has_thread) && !busy && !pending.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> WorkflowSnapshot {
        WorkflowSnapshot::default()
    }

    #[test]
    fn test_no_flags_means_no_gate() {
        assert_eq!(active_gate(&snapshot()), Gate::None);
        assert!(!active_gate(&snapshot()).is_open());
    }

    #[test]
    fn test_single_flag_selects_its_gate() {
        let mut s = snapshot();
        s.waiting_for_missing_info = true;
        assert_eq!(active_gate(&s), Gate::MissingInfo);

        let mut s = snapshot();
        s.waiting_for_approval = true;
        assert_eq!(active_gate(&s), Gate::Approval);

        let mut s = snapshot();
        s.waiting_for_security_review = true;
        assert_eq!(active_gate(&s), Gate::SecurityReview);
    }

    #[test]
    fn test_multi_flag_precedence() {
        let mut s = snapshot();
        s.waiting_for_missing_info = true;
        s.waiting_for_approval = true;
        s.waiting_for_security_review = true;
        assert_eq!(active_gate(&s), Gate::SecurityReview);

        let mut s = snapshot();
        s.waiting_for_missing_info = true;
        s.waiting_for_approval = true;
        assert_eq!(active_gate(&s), Gate::Approval);
    }

    #[test]
    fn test_terminal_requires_end_and_closed_gates() {
        let mut s = snapshot();
        s.next_action = "end".to_string();
        assert!(is_terminal(&s));

        s.waiting_for_approval = true;
        assert!(!is_terminal(&s));

        let mut s = snapshot();
        s.next_action = "generate".to_string();
        assert!(!is_terminal(&s));
    }

    #[test]
    fn test_input_enabled_in_fresh_session() {
        assert!(input_enabled(None, false));
        assert!(input_enabled(Some(&snapshot()), false));
    }

    #[test]
    fn test_input_disabled_while_backend_computes() {
        // Thread exists, snapshot not yet fetched.
        assert!(!input_enabled(None, true));
        // Snapshot present, no gate, not terminal.
        let mut s = snapshot();
        s.next_action = "generate".to_string();
        assert!(!input_enabled(Some(&s), true));
    }

    #[test]
    fn test_input_enabled_at_gate_and_terminal() {
        let mut s = snapshot();
        s.waiting_for_missing_info = true;
        assert!(input_enabled(Some(&s), true));

        let mut s = snapshot();
        s.next_action = "end".to_string();
        assert!(input_enabled(Some(&s), true));
    }

    #[test]
    fn test_send_enabled_needs_text_and_idle() {
        let mut s = snapshot();
        s.waiting_for_missing_info = true;
        assert!(send_enabled(Some(&s), true, false, "us-east-1"));
        assert!(!send_enabled(Some(&s), true, false, "   "));
        assert!(!send_enabled(Some(&s), true, true, "us-east-1"));
    }
}
