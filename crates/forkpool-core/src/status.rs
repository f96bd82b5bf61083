//! Status enums for Tasks and Workers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a Task.
///
/// Transitions are monotonic: `Queued -> Started -> {Finished | Errored | Fatal}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task created and waiting in the pending list.
    #[default]
    Queued,
    /// A worker reported that it started the task.
    Started,
    /// Task completed successfully.
    Finished,
    /// The task handler reported a recoverable error.
    Errored,
    /// The task handler or its worker failed fatally.
    Fatal,
}

impl TaskStatus {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Errored | Self::Fatal)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Started => 1,
            Self::Finished | Self::Errored | Self::Fatal => 2,
        }
    }

    /// Returns true if moving from `self` to `next` goes strictly forward.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Finished => "finished",
            Self::Errored => "errored",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Availability of a worker for dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Worker is idle and may receive a task.
    #[default]
    Free,
    /// Worker holds exactly one in-flight task.
    Busy,
}

impl WorkerStatus {
    /// Returns true if the worker can accept a task.
    pub fn can_accept_task(&self) -> bool {
        matches!(self, Self::Free)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => f.write_str("FREE"),
            Self::Busy => f.write_str("BUSY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_monotonic() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Started));
        assert!(TaskStatus::Started.can_transition_to(TaskStatus::Finished));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Fatal));
        assert!(!TaskStatus::Started.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Finished.can_transition_to(TaskStatus::Errored));
        assert!(!TaskStatus::Started.can_transition_to(TaskStatus::Started));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Errored).unwrap(),
            "\"errored\""
        );
        assert_eq!(serde_json::to_string(&WorkerStatus::Busy).unwrap(), "\"BUSY\"");
    }
}
