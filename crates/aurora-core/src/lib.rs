//! Synchronization client for the aurora infrastructure workflow service.
//!
//! Tracks one long-running, human-in-the-loop workflow thread on the
//! backend and keeps a local session consistent with it by polling: the
//! [`session::SessionController`] is the single entry point a presentation
//! layer talks to.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod poller;
pub mod profile;
pub mod session;
pub mod snapshot;
pub mod transcript;

// Re-export main types for convenience
pub use api::{AuthStatus, HttpWorkflowApi, SecurityAction, UserProfile, WorkflowApi};
pub use config::Config;
pub use dispatch::ActionDispatcher;
pub use error::{ClientError, ClientResult, UserAction};
pub use gate::Gate;
pub use poller::PollerState;
pub use session::{SessionController, SessionEvent, SessionHandle, SessionState};
pub use snapshot::{ChatMessage, Role, Severity, ThreadId, WorkflowSnapshot};
