//! Worker runtime error types.

use forkpool_core::Failure;
use forkpool_proto::ProtocolError;
use thiserror::Error;

/// Errors that end a worker runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Init hook failed: {0}")]
    Init(Failure),

    #[error("Failed to install logger: {0}")]
    Logging(String),
}

/// Failure returned by a [`TaskHandler`](crate::TaskHandler).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Recoverable; reported as `taskError`.
    #[error("{0}")]
    Error(Failure),

    /// Reported as `taskFatal`.
    #[error("fatal: {0}")]
    Fatal(Failure),
}

impl HandlerError {
    /// A recoverable error with a message.
    pub fn error(message: impl Into<String>) -> Self {
        HandlerError::Error(Failure::new(message))
    }

    /// A fatal error with a message.
    pub fn fatal(message: impl Into<String>) -> Self {
        HandlerError::Fatal(Failure::new(message))
    }

    pub fn failure(&self) -> &Failure {
        match self {
            HandlerError::Error(failure) | HandlerError::Fatal(failure) => failure,
        }
    }
}

impl From<Failure> for HandlerError {
    fn from(failure: Failure) -> Self {
        HandlerError::Error(failure)
    }
}
