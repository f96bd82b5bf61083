//! Message types for both channel directions.
//!
//! Every message is an adjacently tagged envelope:
//! `{"type": "<camelCase name>", "data": <payload>}`. Messages without a
//! payload omit `data`.

use forkpool_core::{Failure, Task, TaskId, WorkerId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// A message type that can travel over the channel in one direction.
pub trait Message: Serialize + DeserializeOwned {
    /// Every `type` value recognized for this direction.
    const TYPES: &'static [&'static str];

    /// Wire name of this message.
    fn kind(&self) -> &'static str;
}

/// Messages sent from the coordinator to a worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum CoordinatorMessage {
    /// First message after spawn; the worker answers with `online`.
    Init(InitData),

    /// Execute one task.
    Task(Task),

    /// Finish the current task, run the drain hook and exit.
    Shutdown,
}

impl Message for CoordinatorMessage {
    const TYPES: &'static [&'static str] = &["init", "task", "shutdown"];

    fn kind(&self) -> &'static str {
        match self {
            CoordinatorMessage::Init(_) => "init",
            CoordinatorMessage::Task(_) => "task",
            CoordinatorMessage::Shutdown => "shutdown",
        }
    }
}

/// Payload of the `init` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitData {
    /// Pool index of the receiving worker.
    pub id: WorkerId,

    /// Log level the worker should apply (`trace`..`error`).
    pub log_level: String,

    /// Opaque application data forwarded from the pool configuration.
    #[serde(default)]
    pub init_data: Value,
}

/// Messages sent from a worker process to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum WorkerMessage {
    /// Worker finished initialization and accepts tasks.
    Online,

    /// The task handler was invoked.
    TaskStarted(TaskId),

    /// The task handler completed.
    TaskFinished(TaskOutcome),

    /// The task handler reported a recoverable error.
    TaskError(TaskFailure),

    /// The task handler reported a fatal error.
    TaskFatal(TaskFailure),

    /// Worker-level fatal condition (transport anomaly, failed init).
    Fatal(Failure),

    /// Worker-level recoverable error.
    Error(Failure),
}

impl WorkerMessage {
    /// Identity of the task this message is about, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            WorkerMessage::TaskStarted(id) => Some(*id),
            WorkerMessage::TaskFinished(outcome) => Some(outcome.id),
            WorkerMessage::TaskError(failure) | WorkerMessage::TaskFatal(failure) => {
                Some(failure.task_id)
            }
            WorkerMessage::Online | WorkerMessage::Fatal(_) | WorkerMessage::Error(_) => None,
        }
    }

    /// Returns true if the message ends the worker's current task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerMessage::TaskFinished(_)
                | WorkerMessage::TaskError(_)
                | WorkerMessage::TaskFatal(_)
        )
    }
}

impl Message for WorkerMessage {
    const TYPES: &'static [&'static str] = &[
        "online",
        "taskStarted",
        "taskFinished",
        "taskError",
        "taskFatal",
        "fatal",
        "error",
    ];

    fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::Online => "online",
            WorkerMessage::TaskStarted(_) => "taskStarted",
            WorkerMessage::TaskFinished(_) => "taskFinished",
            WorkerMessage::TaskError(_) => "taskError",
            WorkerMessage::TaskFatal(_) => "taskFatal",
            WorkerMessage::Fatal(_) => "fatal",
            WorkerMessage::Error(_) => "error",
        }
    }
}

/// Payload of `taskFinished`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub id: TaskId,
    #[serde(default)]
    pub result: Value,
}

/// Payload of `taskError` and `taskFatal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailure {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub failure: Failure,
}

/// Decode one line into a message, rejecting types unknown to `T`.
pub fn decode_message<T: Message>(line: &str) -> Result<T, ProtocolError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::MissingType(preview(line)))?
        .to_string();

    if !T::TYPES.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

/// Encode a message as a single JSON line (without the newline).
pub fn encode_message<T: Message>(message: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

fn preview(line: &str) -> String {
    line.chars().take(200).collect()
}
