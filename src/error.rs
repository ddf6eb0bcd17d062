//! Per-turn failures.
//!
//! Every variant here is recoverable: the executor or the agent loop turns it
//! into an [`ActionOutcome`](crate::ActionOutcome) error and the run goes on
//! until the consecutive-failure budget says otherwise.

/// A failure that costs the agent one turn.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    /// The page could not be read (navigation interrupted mid-capture, bad payload).
    #[error("could not capture page state: {0}")]
    StateCapture(String),

    /// The model's answer broke the response contract.
    #[error("invalid model output: {0}")]
    ProtocolViolation(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("invalid parameters for '{action}': {message}")]
    Validation { action: String, message: String },

    #[error("element with index {index} does not exist - retry or use alternative actions")]
    UnknownElement { index: usize },

    /// The handler ran and failed (element detached, navigation error, ...).
    #[error("{0}")]
    Execution(String),

    #[error("action '{0}' requires a browser session, but none is bound")]
    ContextMissing(String),

    /// The model call failed or timed out.
    #[error("model request failed: {0}")]
    Model(String),
}

impl StepError {
    /// Short machine-friendly kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateCapture(_) => "state_capture",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::UnknownAction(_) => "unknown_action",
            Self::Validation { .. } => "validation",
            Self::UnknownElement { .. } => "unknown_element",
            Self::Execution(_) => "execution",
            Self::ContextMissing(_) => "context_missing",
            Self::Model(_) => "model",
        }
    }
}

impl From<crate::browser::BrowserError> for StepError {
    fn from(e: crate::browser::BrowserError) -> Self {
        StepError::Execution(e.to_string())
    }
}
