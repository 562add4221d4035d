//! Error taxonomy for run center executions

use runcenter_common::{FrameError, ValidationError};
use serde::{Deserialize, Serialize};

/// Result type for run client operations
pub type RunResult<T> = std::result::Result<T, RunError>;

/// Every way an execution attempt can be rejected
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Malformed request reached the engine
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// Submitted code did not yield a callable handler
    #[error("{0}")]
    Load(String),

    /// The handler threw or rejected
    #[error("{0}")]
    Handler(String),

    /// Effective timeout elapsed before completion
    #[error("Timeout {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// External cancellation observed before completion
    #[error("Execution cancelled")]
    Cancelled,

    /// Capability absent from the registry
    #[error("capability not allowed: {capability}")]
    CapabilityDenied { capability: String },

    /// The isolated context broke the wire protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The isolated context could not be started or died without an outcome
    #[error("Execution context failure: {0}")]
    Context(String),
}

/// Stable discriminator for [`RunError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    LoadError,
    HandlerError,
    TimeoutError,
    CancelledError,
    CapabilityDeniedError,
    ProtocolError,
    ContextError,
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::Validation(_) => ErrorKind::ValidationError,
            RunError::Load(_) => ErrorKind::LoadError,
            RunError::Handler(_) => ErrorKind::HandlerError,
            RunError::Timeout { .. } => ErrorKind::TimeoutError,
            RunError::Cancelled => ErrorKind::CancelledError,
            RunError::CapabilityDenied { .. } => ErrorKind::CapabilityDeniedError,
            RunError::Protocol(_) => ErrorKind::ProtocolError,
            RunError::Context(_) => ErrorKind::ContextError,
        }
    }

    /// Whether the failure is attributable to the submitted code rather than
    /// to the engine or its environment
    pub fn is_caller_fault(&self) -> bool {
        matches!(
            self,
            RunError::Validation(_)
                | RunError::Load(_)
                | RunError::Handler(_)
                | RunError::CapabilityDenied { .. }
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<FrameError> for RunError {
    fn from(err: FrameError) -> Self {
        RunError::Protocol(err.to_string())
    }
}
