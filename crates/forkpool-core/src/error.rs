//! Core domain errors.

use thiserror::Error;

use crate::{TaskId, TaskStatus};

/// Core domain errors for forkpool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Task not found.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Invalid state transition.
    #[error("Invalid state transition for task {task_id}: {from} -> {to}")]
    InvalidStateTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// A result was already recorded for this task.
    #[error("Result already set for task {0}")]
    ResultAlreadySet(TaskId),
}
