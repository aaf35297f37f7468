//! Per-run execution context
//!
//! `RunContext` is what a unit sees of the run it belongs to: identifiers,
//! the shared session state, and the cancellation token it should observe at
//! its suspension points.

use crate::SessionState;
use tokio_util::sync::CancellationToken;

/// Context handed to units during a workflow run
///
/// # Example
///
/// ```
/// use agent_core::RunContext;
///
/// let ctx = RunContext::new("session-123").with_user_id("user-456");
///
/// assert_eq!(ctx.session_id(), "session-123");
/// assert_eq!(ctx.user_id(), Some("user-456"));
/// assert!(!ctx.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    session_id: String,
    user_id: Option<String>,
    session_state: SessionState,
    cancellation: CancellationToken,
}

impl RunContext {
    /// Create a context for a fresh run within `session_id`
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            user_id: None,
            session_state: SessionState::new(),
            cancellation: CancellationToken::new(),
        }
    }

    // =========== Builder Methods ===========

    /// Set the run ID
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Set the user ID
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Share an existing session state
    pub fn with_session_state(mut self, state: SessionState) -> Self {
        self.session_state = state;
        self
    }

    /// Observe an existing cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    // =========== Accessors ===========

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// The session state shared by every unit of the run
    pub fn session_state(&self) -> &SessionState {
        &self.session_state
    }

    /// Token cancelled when the run (or the enclosing parallel group) stops
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Same run, with a cancellation scope nested under this one
    ///
    /// Cancelling the child never affects the parent.
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            ..self.clone()
        }
    }
}
