//! Single-writer session controller.
//!
//! The controller runs as one spawned task that owns the `SessionState`
//! outright: commands come in over a channel, async work (thread creation,
//! action dispatch, snapshot fetches) is spawned off and reports back over
//! an internal channel, and every state change is applied here and only
//! here, then published as a `SessionEvent`. The presentation layer never
//! touches the state directly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::api::{SecurityAction, WorkflowApi};
use crate::dispatch::ActionDispatcher;
use crate::error::{ClientError, UserAction};
use crate::gate::{self, Gate};
use crate::poller::{FetchTag, Poller, DEFAULT_POLL_INTERVAL};
use crate::snapshot::{ChatMessage, ThreadId, WorkflowSnapshot};
use crate::transcript;

/// Client-owned view of one workflow session. Everything here is derived
/// from (or waiting on) the backend; the transcript is rebuilt from each
/// snapshot, with one optimistic local echo of a just-sent user message.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub thread: Option<ThreadId>,
    pub transcript: Vec<ChatMessage>,
    pub snapshot: Option<WorkflowSnapshot>,
    pub busy: bool,
}

impl SessionState {
    pub fn active_gate(&self) -> Gate {
        self.snapshot
            .as_ref()
            .map(gate::active_gate)
            .unwrap_or(Gate::None)
    }

    pub fn is_terminal(&self) -> bool {
        self.snapshot.as_ref().map(gate::is_terminal).unwrap_or(false)
    }

    pub fn input_enabled(&self) -> bool {
        gate::input_enabled(self.snapshot.as_ref(), self.thread.is_some())
    }

    pub fn send_enabled(&self, pending: &str) -> bool {
        gate::send_enabled(
            self.snapshot.as_ref(),
            self.thread.is_some(),
            self.busy,
            pending,
        )
    }
}

/// Notifications published to the presentation layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session state changed; carries a full copy of the new state.
    Updated(SessionState),
    /// A user action could not be dispatched. Busy is cleared and the prior
    /// snapshot is retained unchanged, so a retry is always possible.
    ActionFailed {
        action: UserAction,
        error: ClientError,
    },
}

enum Command {
    Send(String),
    Approve {
        approved: bool,
        feedback: Option<String>,
    },
    Security(SecurityAction),
    Refresh,
    Reset,
    Shutdown,
}

enum TaskResult {
    ThreadStarted(Result<ThreadId, ClientError>),
    ActionDone {
        action: UserAction,
        thread: ThreadId,
        result: Result<(), ClientError>,
    },
    SnapshotFetched {
        tag: FetchTag,
        result: Result<WorkflowSnapshot, ClientError>,
    },
}

/// Cheap clonable handle for issuing commands to a running controller.
/// Sends are fire-and-forget; results come back through the event stream.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: UnboundedSender<Command>,
}

impl SessionHandle {
    pub fn send_message(&self, text: impl Into<String>) {
        let _ = self.cmd_tx.send(Command::Send(text.into()));
    }

    pub fn approve(&self, approved: bool) {
        let _ = self.cmd_tx.send(Command::Approve {
            approved,
            feedback: None,
        });
    }

    pub fn approve_with_feedback(&self, approved: bool, feedback: impl Into<String>) {
        let _ = self.cmd_tx.send(Command::Approve {
            approved,
            feedback: Some(feedback.into()),
        });
    }

    pub fn security_decision(&self, action: SecurityAction) {
        let _ = self.cmd_tx.send(Command::Security(action));
    }

    /// Out-of-band snapshot refresh, independent of the poll timer.
    pub fn refresh(&self) {
        let _ = self.cmd_tx.send(Command::Refresh);
    }

    /// Abandons the current thread and returns to a fresh session.
    pub fn reset(&self) {
        let _ = self.cmd_tx.send(Command::Reset);
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

pub struct SessionController {
    state: SessionState,
    api: Arc<dyn WorkflowApi>,
    dispatcher: ActionDispatcher,
    poller: Poller,
    events: UnboundedSender<SessionEvent>,
    results_tx: UnboundedSender<TaskResult>,
}

impl SessionController {
    /// Spawns the controller task with the default 2 s poll interval.
    pub fn spawn(api: Arc<dyn WorkflowApi>) -> (SessionHandle, UnboundedReceiver<SessionEvent>) {
        Self::spawn_with_interval(api, DEFAULT_POLL_INTERVAL)
    }

    pub fn spawn_with_interval(
        api: Arc<dyn WorkflowApi>,
        poll_interval: Duration,
    ) -> (SessionHandle, UnboundedReceiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let controller = SessionController {
            state: SessionState::default(),
            dispatcher: ActionDispatcher::new(api.clone()),
            api,
            poller: Poller::new(poll_interval, tick_tx),
            events: event_tx,
            results_tx,
        };
        tokio::spawn(controller.run(cmd_rx, tick_rx, results_rx));

        (SessionHandle { cmd_tx }, event_rx)
    }

    async fn run(
        mut self,
        mut cmd_rx: UnboundedReceiver<Command>,
        mut tick_rx: UnboundedReceiver<()>,
        mut results_rx: UnboundedReceiver<TaskResult>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    // All handles dropped or explicit shutdown: the poll
                    // timer dies with the poller when `self` drops.
                    None | Some(Command::Shutdown) => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(result) = results_rx.recv() => self.handle_result(result),
                Some(()) = tick_rx.recv() => self.handle_tick(),
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Send(text) => self.handle_send(text),
            Command::Approve { approved, feedback } => self.handle_approval(approved, feedback),
            Command::Security(action) => self.handle_security(action),
            Command::Refresh => self.request_refresh(),
            Command::Reset => self.handle_reset(),
            // Consumed by the run loop.
            Command::Shutdown => {}
        }
    }

    /// First message starts a thread; while the missing-info gate is open a
    /// message answers it; anything else is refused loudly rather than
    /// silently dropped.
    fn handle_send(&mut self, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }

        let Some(thread) = self.state.thread.clone() else {
            if self.refuse_if_busy(UserAction::StartThread) {
                return;
            }
            self.state.busy = true;
            self.state.transcript.push(ChatMessage::user(text.as_str()));
            self.emit_updated();

            let dispatcher = self.dispatcher.clone();
            let results = self.results_tx.clone();
            tokio::spawn(async move {
                let result = dispatcher.start_thread(&text).await;
                let _ = results.send(TaskResult::ThreadStarted(result));
            });
            return;
        };

        let gate = self.state.active_gate();
        if gate != Gate::MissingInfo {
            self.emit_failure(
                UserAction::AnswerMissingInfo,
                ClientError::InvalidGateAction {
                    action: UserAction::AnswerMissingInfo,
                    gate,
                },
            );
            return;
        }
        if self.refuse_if_busy(UserAction::AnswerMissingInfo) {
            return;
        }

        self.state.busy = true;
        self.state.transcript.push(ChatMessage::user(text.as_str()));
        self.sync_poller();
        self.emit_updated();

        let dispatcher = self.dispatcher.clone();
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let result = dispatcher
                .answer_missing_info(&thread, Gate::MissingInfo, &text)
                .await;
            let _ = results.send(TaskResult::ActionDone {
                action: UserAction::AnswerMissingInfo,
                thread,
                result,
            });
        });
    }

    fn handle_approval(&mut self, approved: bool, feedback: Option<String>) {
        let action = UserAction::DecideApproval;
        let gate = self.state.active_gate();
        let Some(thread) = self.state.thread.clone() else {
            self.emit_failure(action, ClientError::InvalidGateAction { action, gate });
            return;
        };
        if gate != Gate::Approval {
            self.emit_failure(action, ClientError::InvalidGateAction { action, gate });
            return;
        }
        if self.refuse_if_busy(action) {
            return;
        }

        self.state.busy = true;
        self.sync_poller();
        self.emit_updated();

        let dispatcher = self.dispatcher.clone();
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let result = dispatcher
                .decide_approval(&thread, Gate::Approval, approved, feedback.as_deref())
                .await;
            let _ = results.send(TaskResult::ActionDone {
                action,
                thread,
                result,
            });
        });
    }

    fn handle_security(&mut self, security_action: SecurityAction) {
        let action = UserAction::DecideSecurity;
        let gate = self.state.active_gate();
        let Some(thread) = self.state.thread.clone() else {
            self.emit_failure(action, ClientError::InvalidGateAction { action, gate });
            return;
        };
        if gate != Gate::SecurityReview {
            self.emit_failure(action, ClientError::InvalidGateAction { action, gate });
            return;
        }
        if self.refuse_if_busy(action) {
            return;
        }

        self.state.busy = true;
        self.sync_poller();
        self.emit_updated();

        let dispatcher = self.dispatcher.clone();
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let result = dispatcher
                .decide_security(&thread, Gate::SecurityReview, security_action)
                .await;
            let _ = results.send(TaskResult::ActionDone {
                action,
                thread,
                result,
            });
        });
    }

    fn handle_result(&mut self, result: TaskResult) {
        match result {
            TaskResult::ThreadStarted(Ok(thread)) => {
                debug!(%thread, "workflow thread created");
                self.state.thread = Some(thread);
                self.sync_poller();
                self.request_refresh();
                self.emit_updated();
            }
            TaskResult::ThreadStarted(Err(error)) => {
                // No thread was created; retract the optimistic echo so the
                // local transcript matches the remote state again.
                self.state.busy = false;
                self.rederive_transcript();
                self.emit_failure(UserAction::StartThread, error);
                self.emit_updated();
            }
            TaskResult::ActionDone {
                thread,
                result: Ok(()),
                ..
            } => {
                // Bounded latency after an action: refresh now instead of
                // waiting for the next timer tick.
                if self.state.thread.as_ref() == Some(&thread) {
                    self.request_refresh();
                }
            }
            TaskResult::ActionDone {
                action,
                result: Err(error),
                ..
            } => {
                self.state.busy = false;
                self.sync_poller();
                self.emit_failure(action, error);
                self.emit_updated();
            }
            TaskResult::SnapshotFetched { tag, result } => self.handle_snapshot(tag, result),
        }
    }

    fn handle_tick(&mut self) {
        let Some(thread) = self.state.thread.clone() else {
            return;
        };
        if let Some(tag) = self.poller.begin_timed(&thread) {
            self.spawn_fetch(tag);
        }
    }

    fn request_refresh(&mut self) {
        if let Some(thread) = self.state.thread.clone() {
            let tag = self.poller.begin_refresh(&thread);
            self.spawn_fetch(tag);
        }
    }

    fn spawn_fetch(&self, tag: FetchTag) {
        let api = self.api.clone();
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_snapshot(&tag.thread).await;
            let _ = results.send(TaskResult::SnapshotFetched { tag, result });
        });
    }

    fn handle_snapshot(&mut self, tag: FetchTag, result: Result<WorkflowSnapshot, ClientError>) {
        self.poller.settle(&tag);
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(error) => {
                // Poll failures are logged and swallowed; the next interval
                // or the next user action retries naturally.
                warn!(thread = %tag.thread, %error, "snapshot fetch failed");
                return;
            }
        };
        if !self.poller.accept(&tag, self.state.thread.as_ref()) {
            return;
        }
        self.apply_snapshot(snapshot);
    }

    /// Full replacement: the fetched snapshot becomes the session's truth,
    /// the transcript is rebuilt from it, and busy clears once the backend
    /// has settled into a gate or the terminal state.
    fn apply_snapshot(&mut self, snapshot: WorkflowSnapshot) {
        self.state.transcript = transcript::visible_messages(&snapshot);
        let gate = gate::active_gate(&snapshot);
        let terminal = gate::is_terminal(&snapshot);
        self.state.snapshot = Some(snapshot);
        if gate.is_open() || terminal {
            self.state.busy = false;
        }
        if terminal {
            self.poller.on_terminal();
        } else {
            self.sync_poller();
        }
        self.emit_updated();
    }

    fn handle_reset(&mut self) {
        self.state = SessionState::default();
        self.poller.reset();
        self.emit_updated();
    }

    fn sync_poller(&mut self) {
        let active = self.state.busy || self.state.active_gate().is_open();
        self.poller.sync(self.state.thread.is_some(), active);
    }

    fn rederive_transcript(&mut self) {
        self.state.transcript = self
            .state
            .snapshot
            .as_ref()
            .map(transcript::visible_messages)
            .unwrap_or_default();
    }

    /// The presentation layer disables sending while busy; a command that
    /// arrives anyway is refused, not queued.
    fn refuse_if_busy(&mut self, action: UserAction) -> bool {
        if self.state.busy {
            self.emit_failure(
                action,
                ClientError::ActionDispatch {
                    action,
                    reason: "a previous action is still settling".to_string(),
                },
            );
            true
        } else {
            false
        }
    }

    fn emit_updated(&self) {
        let _ = self.events.send(SessionEvent::Updated(self.state.clone()));
    }

    fn emit_failure(&self, action: UserAction, error: ClientError) {
        debug!(%action, %error, "action refused or failed");
        let _ = self.events.send(SessionEvent::ActionFailed { action, error });
    }
}
