//! Task type and task failures.

use crate::{CoreError, TaskId, TaskStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A Task is one unit of work travelling from the queue to a worker and back.
///
/// The queue owns the canonical copy. Workers receive a serialized copy, so
/// the payload is never shared by reference across processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    id: TaskId,
    payload: Value,
    result: Option<Value>,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<Failure>,
}

impl Task {
    /// Create a new queued Task.
    pub fn new(id: TaskId, payload: Value) -> Self {
        Self {
            id,
            payload,
            result: None,
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            failure: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Caller-supplied payload. Immutable after creation.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Result recorded on success, if any.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// The failure that ended an errored or fatal task.
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Execution time, known once the task has both started and finished.
    pub fn exec_time(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(finish)) => Some(finish - start),
            _ => None,
        }
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record the result. A task's result can be written only once.
    pub fn set_result(&mut self, result: Value) -> Result<(), CoreError> {
        if self.result.is_some() {
            return Err(CoreError::ResultAlreadySet(self.id));
        }
        self.result = Some(result);
        Ok(())
    }

    /// Mark the task as started.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.transition(TaskStatus::Started)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the task as finished.
    pub fn finish(&mut self) -> Result<(), CoreError> {
        self.transition(TaskStatus::Finished)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the task as errored.
    pub fn fail(&mut self, failure: Failure) -> Result<(), CoreError> {
        self.transition(TaskStatus::Errored)?;
        self.finished_at = Some(Utc::now());
        self.failure = Some(failure);
        Ok(())
    }

    /// Mark the task as fatally failed.
    pub fn fatal(&mut self, failure: Failure) -> Result<(), CoreError> {
        self.transition(TaskStatus::Fatal)?;
        self.finished_at = Some(Utc::now());
        self.failure = Some(failure);
        Ok(())
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                task_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Error report attached to `taskError`, `taskFatal` and worker-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Human readable message.
    pub message: String,

    /// Optional machine readable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Optional stack or backtrace captured by the reporter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl Failure {
    /// Create a failure with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            stack: None,
        }
    }

    /// Builder method to set the code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Builder method to set the stack.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for Failure {}
