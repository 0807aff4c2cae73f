//! Engine client error types.

use thiserror::Error;

/// Result type alias for engine calls.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors from the engine RPC surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Connection failures and timeouts.
    #[error("engine unreachable: {0}")]
    Transport(String),

    /// Non-2xx response from the engine.
    #[error("engine returned {status}: {message}")]
    Status { status: u16, message: String },

    /// 2xx response with a body the client could not interpret.
    #[error("invalid engine response: {0}")]
    InvalidResponse(String),
}

impl EngineError {
    /// Whether the failure maps to upstream-unavailable (503) rather than a
    /// caller error.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::InvalidResponse(_) => false,
        }
    }
}
