//! Director - matches pending tasks to free workers.

use forkpool_core::{Failure, Task, TaskId, WorkerId};
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::pool::WorkerPool;
use crate::queue::TaskQueue;
use crate::worker::WorkerHandle;

/// Stateless dispatcher. Every decision reads the pool and queue it is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct Director;

impl Director {
    pub fn new() -> Self {
        Self
    }

    /// A task was added: hand the next pending task to a free worker, if any.
    pub async fn on_task_added(&self, workers: &mut WorkerPool, tasks: &mut TaskQueue) {
        let Some(worker) = workers.get_free_worker() else {
            trace!(pending = tasks.queue_size(), "No free worker, task waits");
            return;
        };
        let Some(task) = tasks.get_next_task() else {
            return;
        };
        dispatch(worker, task, tasks).await;
    }

    pub fn on_task_started(&self, tasks: &mut TaskQueue, worker_id: WorkerId, task_id: TaskId) {
        trace!(worker_id = %worker_id, task_id = %task_id, "Task started");
        tasks.mark_started(task_id);
    }

    /// A task finished: record it, then keep the finishing worker busy.
    pub async fn on_task_finished(
        &self,
        workers: &mut WorkerPool,
        tasks: &mut TaskQueue,
        worker_id: WorkerId,
        task_id: TaskId,
        result: Value,
    ) {
        tasks.set_result(task_id, result);
        tasks.mark_finished(task_id);

        if tasks.is_queue_empty() {
            trace!(worker_id = %worker_id, "Queue drained");
            return;
        }

        let same_worker_free = workers.get(worker_id).is_some_and(WorkerHandle::is_free);
        let worker = if same_worker_free {
            workers.get_mut(worker_id)
        } else {
            workers.get_free_worker()
        };
        let Some(worker) = worker else {
            // Task stays at the head of the pending list.
            error!(
                worker_id = %worker_id,
                pending = tasks.queue_size(),
                "No free worker after task finished"
            );
            return;
        };
        if let Some(task) = tasks.get_next_task() {
            dispatch(worker, task, tasks).await;
        }
    }

    pub fn on_task_error(
        &self,
        tasks: &mut TaskQueue,
        worker_id: WorkerId,
        task_id: TaskId,
        failure: Failure,
    ) {
        warn!(worker_id = %worker_id, task_id = %task_id, failure = %failure, "Task error");
        tasks.mark_errored(task_id, failure);
    }

    pub fn on_task_fatal(
        &self,
        tasks: &mut TaskQueue,
        worker_id: WorkerId,
        task_id: TaskId,
        failure: Failure,
    ) {
        error!(worker_id = %worker_id, task_id = %task_id, failure = %failure, "Task fatal");
        tasks.mark_fatal(task_id, failure);
    }
}

/// Send `task` to `worker`, returning it to the queue if the worker rejects it.
async fn dispatch(worker: &mut WorkerHandle, task: Task, tasks: &mut TaskQueue) -> bool {
    let task_id = task.id();
    if worker.send_task(&task).await {
        debug!(worker_id = %worker.id(), task_id = %task_id, "Task dispatched");
        true
    } else {
        warn!(worker_id = %worker.id(), task_id = %task_id, "Dispatch rejected, requeueing");
        tasks.return_to_queue(task_id);
        false
    }
}
