//! Manager - owns the pool, the queue and the director.

use std::collections::{BTreeMap, VecDeque};

use forkpool_core::{Failure, Task, TaskEvent, TaskId, WorkerId, WorkerStat};
use forkpool_proto::WorkerMessage;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, trace, warn};

use crate::channel::{SignalKind, WorkerSignal};
use crate::config::PoolConfig;
use crate::director::Director;
use crate::error::{ManagerError, WorkerError};
use crate::pool::WorkerPool;
use crate::queue::TaskQueue;

/// Something the caller of [`Manager::next_event`] should know about.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    TaskStarted {
        worker_id: WorkerId,
        task_id: TaskId,
    },
    TaskFinished {
        worker_id: WorkerId,
        task_id: TaskId,
        result: Value,
    },
    TaskError {
        worker_id: WorkerId,
        task_id: TaskId,
        failure: Failure,
    },
    TaskFatal {
        worker_id: WorkerId,
        task_id: TaskId,
        failure: Failure,
    },
    /// A worker reported a fatal condition, broke the protocol, or exited
    /// with a non-zero code without being asked to.
    Fatal {
        worker_id: WorkerId,
        failure: Failure,
    },
    /// A worker reported a recoverable worker-level error.
    Error {
        worker_id: WorkerId,
        failure: Failure,
    },
    /// A worker's channel closed.
    Close {
        worker_id: WorkerId,
        code: Option<i32>,
    },
}

impl PoolEvent {
    pub fn worker_id(&self) -> WorkerId {
        match self {
            PoolEvent::TaskStarted { worker_id, .. }
            | PoolEvent::TaskFinished { worker_id, .. }
            | PoolEvent::TaskError { worker_id, .. }
            | PoolEvent::TaskFatal { worker_id, .. }
            | PoolEvent::Fatal { worker_id, .. }
            | PoolEvent::Error { worker_id, .. }
            | PoolEvent::Close { worker_id, .. } => *worker_id,
        }
    }
}

/// Coordinator facade.
///
/// All queue and pool mutations happen in `&mut self` methods. Worker reader
/// tasks only forward signals, which are applied when the caller pumps
/// [`next_event`](Self::next_event).
///
/// A task error frees its worker without dispatching the next pending task,
/// so callers feed work as workers report back rather than waiting for the
/// pool to go idle on a backlog:
///
/// ```rust,no_run
/// use forkpool_manager::{Manager, PoolConfig, PoolEvent};
/// use serde_json::json;
///
/// async fn run() -> Result<(), Box<dyn std::error::Error>> {
///     let mut manager = Manager::new(PoolConfig::new(2, "./my-worker"))?;
///     let workers = manager.up().await?;
///
///     let mut payloads = (0..10).map(|i| json!({"type": "echo", "msg": i}));
///     for payload in payloads.by_ref().take(workers) {
///         manager.add_task(payload).await;
///     }
///     while let Some(event) = manager.next_event().await {
///         println!("{:?}", event);
///         if let PoolEvent::TaskFinished { .. }
///         | PoolEvent::TaskError { .. }
///         | PoolEvent::TaskFatal { .. } = event
///         {
///             if let Some(payload) = payloads.next() {
///                 manager.add_task(payload).await;
///             }
///         }
///         if manager.is_idle() {
///             break;
///         }
///     }
///
///     manager.shutdown().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Manager {
    config: PoolConfig,
    workers: WorkerPool,
    tasks: TaskQueue,
    director: Director,
    signals: Option<mpsc::UnboundedReceiver<WorkerSignal>>,
    events: VecDeque<PoolEvent>,
}

impl Manager {
    /// Create a manager. Fails if the configuration is invalid.
    pub fn new(config: PoolConfig) -> Result<Self, ManagerError> {
        let config = config.resolve()?;
        let mut workers = WorkerPool::new();
        workers.setup(&config);
        Ok(Self {
            config,
            workers,
            tasks: TaskQueue::new(),
            director: Director::new(),
            signals: None,
            events: VecDeque::new(),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Start all workers. Returns the number of workers online.
    ///
    /// If any worker fails to start the whole call fails; workers that did
    /// start keep running until [`shutdown`](Self::shutdown).
    pub async fn up(&mut self) -> Result<usize, ManagerError> {
        if self.signals.is_some() {
            return Err(ManagerError::AlreadyUp);
        }
        info!(
            fork_count = self.config.fork_count,
            worker = %self.config.worker.path.display(),
            "Starting pool"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        self.signals = Some(rx);
        let count = self.workers.up(tx).await?;

        // Tasks added before the pool came up are waiting.
        for _ in 0..self.tasks.queue_size() {
            self.director
                .on_task_added(&mut self.workers, &mut self.tasks)
                .await;
        }
        Ok(count)
    }

    /// Stop all workers and apply whatever they reported on the way out.
    pub async fn shutdown(&mut self) -> Result<(), ManagerError> {
        info!("Shutting down pool");
        let result = self.workers.shutdown().await;
        self.drain_signals().await;
        result.map_err(ManagerError::from)
    }

    /// Add a task and dispatch it if a worker is free.
    pub async fn add_task(&mut self, payload: Value) -> Task {
        let task = self.tasks.add(payload);
        self.director
            .on_task_added(&mut self.workers, &mut self.tasks)
            .await;
        task
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Subscribe to task lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tasks.subscribe()
    }

    pub fn workers_stat(&self) -> BTreeMap<WorkerId, WorkerStat> {
        self.workers.workers_stat()
    }

    /// Returns true when no task is pending or running.
    pub fn is_idle(&self) -> bool {
        self.tasks.is_queue_empty() && !self.workers.has_busy_workers()
    }

    /// Wait for the next pool event, applying worker signals as they arrive.
    ///
    /// Returns `None` once every worker channel has closed and all events
    /// were delivered, or if the pool was never started.
    pub async fn next_event(&mut self) -> Option<PoolEvent> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            let signal = self.signals.as_mut()?.recv().await?;
            self.handle_signal(signal).await;
        }
    }

    async fn drain_signals(&mut self) {
        while let Some(signal) = self.signals.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.handle_signal(signal).await;
        }
    }

    async fn handle_signal(&mut self, signal: WorkerSignal) {
        let WorkerSignal { worker_id, kind } = signal;
        match kind {
            SignalKind::Message(message) => {
                if let Some(worker) = self.workers.get_mut(worker_id) {
                    worker.apply(&message);
                }
                self.handle_message(worker_id, message).await;
            }
            SignalKind::Violation(err) if err.is_message_level() => {
                error!(worker_id = %worker_id, error = %err, "Worker sent an invalid message");
                self.events.push_back(PoolEvent::Fatal {
                    worker_id,
                    failure: Failure::new(err.to_string()).with_code("PROTOCOL_VIOLATION"),
                });
            }
            SignalKind::Violation(err) => {
                let err = WorkerError::Channel {
                    id: worker_id,
                    source: err,
                };
                error!(worker_id = %worker_id, error = %err, "Worker channel failed");
                if let Some(worker) = self.workers.get_mut(worker_id) {
                    worker.mark_failed();
                }
                self.events.push_back(PoolEvent::Fatal {
                    worker_id,
                    failure: Failure::new(err.to_string()).with_code("CHANNEL_FAILED"),
                });
            }
            SignalKind::Closed { code } => self.handle_close(worker_id, code),
        }
    }

    async fn handle_message(&mut self, worker_id: WorkerId, message: WorkerMessage) {
        let event = match message {
            WorkerMessage::Online => {
                trace!(worker_id = %worker_id, "Ignoring online");
                return;
            }
            WorkerMessage::TaskStarted(task_id) => {
                self.director
                    .on_task_started(&mut self.tasks, worker_id, task_id);
                PoolEvent::TaskStarted { worker_id, task_id }
            }
            WorkerMessage::TaskFinished(outcome) => {
                self.director
                    .on_task_finished(
                        &mut self.workers,
                        &mut self.tasks,
                        worker_id,
                        outcome.id,
                        outcome.result.clone(),
                    )
                    .await;
                PoolEvent::TaskFinished {
                    worker_id,
                    task_id: outcome.id,
                    result: outcome.result,
                }
            }
            WorkerMessage::TaskError(report) => {
                self.director.on_task_error(
                    &mut self.tasks,
                    worker_id,
                    report.task_id,
                    report.failure.clone(),
                );
                PoolEvent::TaskError {
                    worker_id,
                    task_id: report.task_id,
                    failure: report.failure,
                }
            }
            WorkerMessage::TaskFatal(report) => {
                self.director.on_task_fatal(
                    &mut self.tasks,
                    worker_id,
                    report.task_id,
                    report.failure.clone(),
                );
                PoolEvent::TaskFatal {
                    worker_id,
                    task_id: report.task_id,
                    failure: report.failure,
                }
            }
            WorkerMessage::Fatal(failure) => {
                error!(worker_id = %worker_id, failure = %failure, "Worker fatal");
                PoolEvent::Fatal { worker_id, failure }
            }
            WorkerMessage::Error(failure) => {
                warn!(worker_id = %worker_id, failure = %failure, "Worker error");
                PoolEvent::Error { worker_id, failure }
            }
        };
        self.events.push_back(event);
    }

    fn handle_close(&mut self, worker_id: WorkerId, code: Option<i32>) {
        let Some(worker) = self.workers.get_mut(worker_id) else {
            return;
        };
        let requested = worker.shutdown_requested();
        let failed = worker.is_failed();
        let in_flight = worker.mark_closed();

        if let Some(task_id) = in_flight {
            let failure = Failure::new(format!("worker {} exited while running task", worker_id))
                .with_code("WORKER_EXITED");
            self.tasks.mark_fatal(task_id, failure.clone());
            self.events.push_back(PoolEvent::TaskFatal {
                worker_id,
                task_id,
                failure,
            });
        }

        if requested {
            debug!(worker_id = %worker_id, code = ?code, "Worker closed after shutdown");
        } else if failed {
            debug!(worker_id = %worker_id, code = ?code, "Worker closed after channel failure");
        } else if code != Some(0) {
            let err = WorkerError::NonZeroExit {
                id: worker_id,
                code,
            };
            error!(worker_id = %worker_id, code = ?code, "Worker exited unexpectedly");
            self.events.push_back(PoolEvent::Fatal {
                worker_id,
                failure: Failure::new(err.to_string()).with_code("NON_ZERO_EXIT"),
            });
        } else {
            warn!(worker_id = %worker_id, "Worker exited unexpectedly");
        }

        self.events.push_back(PoolEvent::Close { worker_id, code });
    }
}
