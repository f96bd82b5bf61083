//! Task queue: canonical task state plus the FIFO of pending identities.

use std::collections::{BTreeMap, VecDeque};

use forkpool_core::{CoreError, Failure, Task, TaskEvent, TaskId};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Capacity of the task event broadcast channel.
pub const EVENT_CAPACITY: usize = 1024;

/// Owns every task added to the pool and the order pending tasks are handed out.
///
/// Identities come from a counter owned by the queue, start at 1 and are never
/// reused. Unknown identities passed to the `mark_*` methods are logged and
/// ignored.
#[derive(Debug)]
pub struct TaskQueue {
    tasks: BTreeMap<TaskId, Task>,
    pending: VecDeque<TaskId>,
    next_id: u64,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CAPACITY)
    }

    /// Create a queue whose event channel buffers `capacity` events per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            tasks: BTreeMap::new(),
            pending: VecDeque::new(),
            next_id: 1,
            events,
        }
    }

    /// Subscribe to task lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Create a task from `payload`, store it and append it to the pending list.
    pub fn add(&mut self, payload: Value) -> Task {
        let id = TaskId::new(self.next_id);
        self.next_id += 1;

        let task = Task::new(id, payload);
        self.tasks.insert(id, task.clone());
        self.pending.push_back(id);
        debug!(task_id = %id, pending = self.pending.len(), "Task added");

        self.publish(TaskEvent::Added(task.clone()));
        task
    }

    /// Pop the head of the pending list. The task's status is unchanged.
    pub fn get_next_task(&mut self) -> Option<Task> {
        while let Some(id) = self.pending.pop_front() {
            if let Some(task) = self.tasks.get(&id) {
                return Some(task.clone());
            }
        }
        None
    }

    /// Append a known task to the tail of the pending list.
    pub fn return_to_queue(&mut self, id: TaskId) {
        if !self.tasks.contains_key(&id) {
            return;
        }
        self.pending.push_back(id);
        debug!(task_id = %id, pending = self.pending.len(), "Task returned to queue");
    }

    /// Store the result of a task. Returns false if the task is unknown.
    pub fn set_result(&mut self, id: TaskId, result: Value) -> bool {
        let Some(task) = self.tasks.get_mut(&id) else {
            error!(task_id = %id, "No task found to set result");
            return false;
        };
        if let Err(e) = task.set_result(result) {
            warn!(task_id = %id, error = %e, "Discarding result");
        }
        true
    }

    pub fn mark_started(&mut self, id: TaskId) {
        self.update(id, Task::start, TaskEvent::Started(id));
    }

    pub fn mark_finished(&mut self, id: TaskId) {
        self.update(id, Task::finish, TaskEvent::Finished(id));
    }

    pub fn mark_errored(&mut self, id: TaskId, failure: Failure) {
        let event = TaskEvent::Error {
            task_id: id,
            failure: failure.clone(),
        };
        self.update(id, |task| task.fail(failure), event);
    }

    pub fn mark_fatal(&mut self, id: TaskId, failure: Failure) {
        let event = TaskEvent::Fatal {
            task_id: id,
            failure: failure.clone(),
        };
        self.update(id, |task| task.fatal(failure), event);
    }

    /// Look up a task.
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Number of tasks waiting for a worker.
    pub fn queue_size(&self) -> usize {
        self.pending.len()
    }

    pub fn is_queue_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of tasks ever added.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Iterate over all tasks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    fn update<F>(&mut self, id: TaskId, apply: F, event: TaskEvent)
    where
        F: FnOnce(&mut Task) -> Result<(), CoreError>,
    {
        let Some(task) = self.tasks.get_mut(&id) else {
            error!(task_id = %id, event = event.name(), "No task found");
            return;
        };
        if let Err(e) = apply(task) {
            error!(task_id = %id, error = %e, "Ignoring task transition");
            return;
        }
        debug!(task_id = %id, status = %task.status(), "Task updated");
        self.publish(event);
    }

    fn publish(&self, event: TaskEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
