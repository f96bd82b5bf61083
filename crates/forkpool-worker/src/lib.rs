//! Runtime for forkpool worker processes.
//!
//! A worker binary implements [`TaskHandler`] and calls [`serve`]:
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use forkpool_core::Task;
//! use forkpool_worker::{serve, HandlerError, TaskHandler};
//! use serde_json::Value;
//!
//! struct Upper;
//!
//! #[async_trait]
//! impl TaskHandler for Upper {
//!     async fn handle(&self, task: &Task) -> Result<Value, HandlerError> {
//!         let text = task.payload().as_str().ok_or_else(|| HandlerError::error("not a string"))?;
//!         Ok(Value::String(text.to_uppercase()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     serve(Upper).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod runtime;

pub use error::{HandlerError, RuntimeError};
pub use forkpool_proto::InitData;
pub use logging::{init_stderr, LogLevelHandle};
pub use runtime::{RuntimeState, TaskHandler, WorkerRuntime};

/// Install stderr logging and run `handler` over stdin/stdout.
pub async fn serve<H: TaskHandler + 'static>(handler: H) -> Result<(), RuntimeError> {
    let log_level = init_stderr()?;
    WorkerRuntime::new(handler)
        .with_log_level(log_level)
        .run_stdio()
        .await
}
