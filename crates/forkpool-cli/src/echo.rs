//! Echo task handler used by `forkpool-echo-worker`.
//!
//! Task payloads are objects with a `type` field:
//!
//! | type | result |
//! |---|---|
//! | `echo` | `{"echo": "ECHO <msg>"}` |
//! | `mirror` | the payload itself |
//! | `sleep` | `{"slept": <ms>}` after sleeping `ms` milliseconds |
//! | `fail` | `taskError` |
//! | `fatal` | `taskFatal` |
//! | `exit` | the process exits with `code` |

use std::time::Duration;

use async_trait::async_trait;
use forkpool_core::{Failure, Task};
use forkpool_worker::{HandlerError, InitData, TaskHandler};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Worker index that never comes online, for startup timeout testing.
pub const SILENT_ID_ENV: &str = "FORKPOOL_ECHO_SILENT_ID";

#[derive(Debug, Default, Clone)]
pub struct EchoHandler {
    silent_id: Option<usize>,
}

impl EchoHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read [`SILENT_ID_ENV`] from the environment.
    pub fn from_env() -> Self {
        let silent_id = std::env::var(SILENT_ID_ENV)
            .ok()
            .and_then(|value| value.parse().ok());
        Self { silent_id }
    }

    /// Never finish `init` on the worker with this index.
    pub fn with_silent_id(mut self, id: usize) -> Self {
        self.silent_id = Some(id);
        self
    }
}

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(&self, task: &Task) -> Result<Value, HandlerError> {
        let payload = task.payload();
        match payload.get("type").and_then(Value::as_str) {
            Some("echo") => {
                let msg = match payload.get("msg") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                Ok(json!({ "echo": format!("ECHO {}", msg) }))
            }
            Some("mirror") => Ok(payload.clone()),
            Some("sleep") => {
                let ms = payload.get("ms").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({ "slept": ms }))
            }
            Some("fail") => Err(HandlerError::Error(
                Failure::new(format!("task {} failed on request", task.id())).with_code("E_ECHO_FAIL"),
            )),
            Some("fatal") => Err(HandlerError::Fatal(
                Failure::new(format!("task {} is fatal on request", task.id()))
                    .with_code("E_ECHO_FATAL"),
            )),
            Some("exit") => {
                let code = payload.get("code").and_then(Value::as_i64).unwrap_or(1);
                warn!(task_id = %task.id(), code, "Exiting on request");
                std::process::exit(i32::try_from(code).unwrap_or(1));
            }
            other => Err(HandlerError::Error(
                Failure::new(format!("unknown task type {:?}", other)).with_code("E_UNKNOWN_TYPE"),
            )),
        }
    }

    async fn on_init(&self, init: &InitData) -> Result<(), Failure> {
        if self.silent_id == Some(init.id.index()) {
            debug!(worker_id = %init.id, "Staying silent");
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forkpool_core::{TaskId, WorkerId};

    fn task(payload: Value) -> Task {
        Task::new(TaskId::new(1), payload)
    }

    #[tokio::test]
    async fn test_echo() {
        let handler = EchoHandler::new();
        let result = handler
            .handle(&task(json!({"type": "echo", "msg": "hello"})))
            .await
            .unwrap();
        assert_eq!(result, json!({"echo": "ECHO hello"}));

        let result = handler
            .handle(&task(json!({"type": "echo", "msg": 42})))
            .await
            .unwrap();
        assert_eq!(result, json!({"echo": "ECHO 42"}));
    }

    #[tokio::test]
    async fn test_failures() {
        let handler = EchoHandler::new();
        match handler.handle(&task(json!({"type": "fail"}))).await {
            Err(HandlerError::Error(failure)) => {
                assert_eq!(failure.code.as_deref(), Some("E_ECHO_FAIL"))
            }
            other => panic!("Expected error, got {:?}", other),
        }
        assert!(matches!(
            handler.handle(&task(json!({"type": "fatal"}))).await,
            Err(HandlerError::Fatal(_))
        ));
        assert!(matches!(
            handler.handle(&task(json!("just a string"))).await,
            Err(HandlerError::Error(_))
        ));
    }

    #[tokio::test]
    async fn test_init_of_other_worker_is_not_silent() {
        let handler = EchoHandler::new().with_silent_id(3);
        let init = InitData {
            id: WorkerId::new(0),
            log_level: "info".to_string(),
            init_data: Value::Null,
        };
        handler.on_init(&init).await.unwrap();
    }
}
