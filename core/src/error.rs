use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Screen capture failed: {0}")]
    CaptureFailure(String),

    #[error("Screen capture timed out after {0} ms")]
    CaptureTimeout(u64),

    /// Carries the decision service's message verbatim.
    #[error("{0}")]
    DecisionError(String),

    #[error("Action dispatch failed: {0}")]
    ActionDispatchFailure(String),

    #[error("App not found: {0}")]
    UnresolvedAppName(String),

    #[error("Executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("A task is already running")]
    SessionActive,

    #[error("stopped")]
    Cancelled,
}

impl AgentError {
    /// Fatal kinds end the step loop. Dispatch failures are fed back to the
    /// decision service instead.
    pub fn is_fatal(&self) -> bool {
        match self {
            AgentError::CaptureFailure(_)
            | AgentError::CaptureTimeout(_)
            | AgentError::DecisionError(_)
            | AgentError::ExecutorUnavailable(_)
            | AgentError::SessionActive => true,
            AgentError::ActionDispatchFailure(_)
            | AgentError::UnresolvedAppName(_)
            | AgentError::Cancelled => false,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }

    /// Text shown on the overlay when this error ends a task.
    pub fn status_text(&self) -> String {
        self.to_string()
    }
}
