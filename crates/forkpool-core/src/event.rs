//! Task lifecycle events published by the task queue.

use crate::{Failure, Task, TaskId};

/// A task lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A task was added to the queue.
    Added(Task),
    /// A worker started the task.
    Started(TaskId),
    /// The task finished successfully.
    Finished(TaskId),
    /// The task handler reported a recoverable error.
    Error { task_id: TaskId, failure: Failure },
    /// The task failed fatally.
    Fatal { task_id: TaskId, failure: Failure },
}

impl TaskEvent {
    /// Identity of the task this event is about.
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::Added(task) => task.id(),
            TaskEvent::Started(id) | TaskEvent::Finished(id) => *id,
            TaskEvent::Error { task_id, .. } | TaskEvent::Fatal { task_id, .. } => *task_id,
        }
    }

    /// Short event name, as used on the wire and in logs.
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Added(_) => "taskAdded",
            TaskEvent::Started(_) => "taskStarted",
            TaskEvent::Finished(_) => "taskFinished",
            TaskEvent::Error { .. } => "taskError",
            TaskEvent::Fatal { .. } => "taskFatal",
        }
    }
}
