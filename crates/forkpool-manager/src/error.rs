//! Coordinator error types.

use forkpool_core::{Failure, WorkerId};
use forkpool_proto::ProtocolError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by a single worker handle.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to spawn worker {id} ({path}): {source}")]
    Spawn {
        id: WorkerId,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {id} did not come online within {timeout_ms}ms")]
    StartupTimeout { id: WorkerId, timeout_ms: u64 },

    #[error("Worker {id} failed during startup: {failure}")]
    StartupFailed { id: WorkerId, failure: Failure },

    #[error("Worker {id} exited during startup (code {code:?})")]
    ExitedDuringStartup { id: WorkerId, code: Option<i32> },

    #[error("Worker {id} exited with code {code:?}")]
    NonZeroExit { id: WorkerId, code: Option<i32> },

    #[error("Channel to worker {id} failed: {source}")]
    Channel {
        id: WorkerId,
        #[source]
        source: ProtocolError,
    },
}

impl WorkerError {
    /// Worker the error belongs to.
    pub fn worker_id(&self) -> WorkerId {
        match self {
            WorkerError::Spawn { id, .. }
            | WorkerError::StartupTimeout { id, .. }
            | WorkerError::StartupFailed { id, .. }
            | WorkerError::ExitedDuringStartup { id, .. }
            | WorkerError::NonZeroExit { id, .. }
            | WorkerError::Channel { id, .. } => *id,
        }
    }
}

/// Errors returned by the [`Manager`](crate::Manager).
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Pool is already up")]
    AlreadyUp,
}
