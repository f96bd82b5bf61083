//! Worker runtime: the loop inside a worker process.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use forkpool_core::{Failure, Task, TaskId, WorkerId};
use forkpool_proto::{
    CoordinatorMessage, Frame, InitData, MessageCodec, TaskFailure, TaskOutcome, WorkerMessage,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::error::{HandlerError, RuntimeError};
use crate::logging::LogLevelHandle;

/// Application code run by a worker.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute one task and return its result.
    async fn handle(&self, task: &Task) -> Result<Value, HandlerError>;

    /// Called once with the `init` data, before `online` is sent.
    async fn on_init(&self, _init: &InitData) -> Result<(), Failure> {
        Ok(())
    }

    /// Called once when the worker stops, after any in-flight task reported.
    async fn on_shutdown(&self) {}
}

/// Lifecycle of a worker runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Uninitialized,
    Ready,
    Executing,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuntimeState::Uninitialized => "uninitialized",
            RuntimeState::Ready => "ready",
            RuntimeState::Executing => "executing",
            RuntimeState::ShuttingDown => "shutting down",
            RuntimeState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

type Running = Pin<Box<dyn Future<Output = (TaskId, Result<Value, HandlerError>)> + Send>>;

/// Drives a [`TaskHandler`] from coordinator messages.
pub struct WorkerRuntime<H> {
    handler: Arc<H>,
    state: RuntimeState,
    worker_id: Option<WorkerId>,
    log_level: Option<LogLevelHandle>,
}

impl<H: TaskHandler + 'static> WorkerRuntime<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            state: RuntimeState::Uninitialized,
            worker_id: None,
            log_level: None,
        }
    }

    /// Apply the level from `init` through this handle.
    pub fn with_log_level(mut self, handle: LogLevelHandle) -> Self {
        self.log_level = Some(handle);
        self
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Run over the process's stdin and stdout.
    pub async fn run_stdio(self) -> Result<(), RuntimeError> {
        self.run(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Run until `shutdown` arrives or the coordinator closes the input.
    ///
    /// Returns an error if the init hook fails or the output breaks.
    pub async fn run<R, W>(mut self, reader: R, writer: W) -> Result<(), RuntimeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut frames = FramedRead::new(reader, MessageCodec::<CoordinatorMessage>::new());
        let mut out = FramedWrite::new(writer, MessageCodec::<WorkerMessage>::new());
        let mut running: Option<Running> = None;

        loop {
            tokio::select! {
                (task_id, outcome) = completion(&mut running) => {
                    out.send(report(task_id, outcome)).await?;
                    if self.state == RuntimeState::ShuttingDown {
                        break;
                    }
                    self.state = RuntimeState::Ready;
                }
                frame = frames.next(), if self.state != RuntimeState::ShuttingDown => {
                    let message = match frame {
                        Some(Ok(Frame::Message(message))) => message,
                        Some(Ok(Frame::Invalid(err))) => {
                            warn!(error = %err, "Invalid message from coordinator");
                            let failure = Failure::new(err.to_string()).with_code("PROTOCOL_VIOLATION");
                            out.send(WorkerMessage::Fatal(failure)).await?;
                            continue;
                        }
                        Some(Err(err)) => {
                            error!(error = %err, "Input stream failed");
                            self.state = RuntimeState::ShuttingDown;
                            if running.is_none() {
                                break;
                            }
                            continue;
                        }
                        None => {
                            debug!("Coordinator closed input");
                            self.state = RuntimeState::ShuttingDown;
                            if running.is_none() {
                                break;
                            }
                            continue;
                        }
                    };

                    match message {
                        CoordinatorMessage::Init(init) => {
                            if let Err(failure) = self.init(&init).await {
                                out.send(WorkerMessage::Fatal(failure.clone())).await?;
                                self.state = RuntimeState::Terminated;
                                return Err(RuntimeError::Init(failure));
                            }
                            out.send(WorkerMessage::Online).await?;
                        }
                        CoordinatorMessage::Task(task) => {
                            if self.state != RuntimeState::Ready {
                                warn!(task_id = %task.id(), state = %self.state, "Dropping task");
                                let failure = Failure::new(format!(
                                    "task {} received while {}",
                                    task.id(),
                                    self.state
                                ))
                                .with_code("NOT_READY");
                                out.send(WorkerMessage::Error(failure)).await?;
                                continue;
                            }
                            self.state = RuntimeState::Executing;
                            out.send(WorkerMessage::TaskStarted(task.id())).await?;
                            running = Some(self.execute(task));
                        }
                        CoordinatorMessage::Shutdown => {
                            debug!(in_flight = running.is_some(), "Shutdown requested");
                            self.state = RuntimeState::ShuttingDown;
                            if running.is_none() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.handler.on_shutdown().await;
        out.flush().await?;
        self.state = RuntimeState::Terminated;
        info!(worker_id = ?self.worker_id, "Worker terminated");
        Ok(())
    }

    async fn init(&mut self, init: &InitData) -> Result<(), Failure> {
        if self.state != RuntimeState::Uninitialized {
            return Err(Failure::new(format!("init received while {}", self.state))
                .with_code("ALREADY_INITIALIZED"));
        }
        if let Some(handle) = &self.log_level {
            if let Err(e) = handle.set_level(&init.log_level) {
                warn!(level = %init.log_level, error = %e, "Keeping current log level");
            }
        }
        self.worker_id = Some(init.id);
        self.handler.on_init(init).await?;
        self.state = RuntimeState::Ready;
        info!(worker_id = %init.id, "Worker online");
        Ok(())
    }

    fn execute(&self, task: Task) -> Running {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            debug!(task_id = %task.id(), "Executing task");
            let outcome = handler.handle(&task).await;
            (task.id(), outcome)
        })
    }
}

/// Wait for the running task, if any. Pending forever when idle.
async fn completion(running: &mut Option<Running>) -> (TaskId, Result<Value, HandlerError>) {
    match running.as_mut() {
        Some(task) => {
            let done = task.await;
            *running = None;
            done
        }
        None => std::future::pending().await,
    }
}

fn report(task_id: TaskId, outcome: Result<Value, HandlerError>) -> WorkerMessage {
    match outcome {
        Ok(result) => WorkerMessage::TaskFinished(TaskOutcome { id: task_id, result }),
        Err(HandlerError::Error(failure)) => {
            WorkerMessage::TaskError(TaskFailure { task_id, failure })
        }
        Err(HandlerError::Fatal(failure)) => {
            WorkerMessage::TaskFatal(TaskFailure { task_id, failure })
        }
    }
}
