//! Coordinator-side handle for one worker process.

use std::process::Stdio;

use forkpool_core::{Task, TaskId, WorkerId, WorkerStat, WorkerStatus};
use forkpool_proto::{CoordinatorMessage, InitData, WorkerMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::channel::{Startup, WorkerChannel, WorkerSignal};
use crate::config::WorkerSettings;
use crate::error::WorkerError;

/// One worker process as seen by the pool.
///
/// A handle is FREE or BUSY. It is BUSY from the moment a task is written to
/// the worker until the worker reports a terminal event for it. It is never
/// FREE before its startup handshake completed, nor after its channel failed
/// or closed.
pub struct WorkerHandle {
    settings: WorkerSettings,
    status: WorkerStatus,
    current_task: Option<TaskId>,
    stat: WorkerStat,
    channel: Option<WorkerChannel>,
    pid: Option<u32>,
    started: bool,
    failed: bool,
    shutdown_requested: bool,
    closed: bool,
}

impl WorkerHandle {
    /// Create a handle. No process is spawned until [`startup`](Self::startup).
    pub fn new(settings: WorkerSettings) -> Self {
        Self {
            settings,
            status: WorkerStatus::Free,
            current_task: None,
            stat: WorkerStat::default(),
            channel: None,
            pid: None,
            started: false,
            failed: false,
            shutdown_requested: false,
            closed: false,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.settings.id
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    /// Task currently in flight on this worker.
    pub fn current_task(&self) -> Option<TaskId> {
        self.current_task
    }

    pub fn stat(&self) -> WorkerStat {
        self.stat
    }

    /// OS process id, once spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns true if the worker can take a task right now.
    pub fn is_free(&self) -> bool {
        self.status.can_accept_task()
            && self.started
            && !self.failed
            && !self.closed
            && self
                .channel
                .as_ref()
                .is_some_and(|channel| !channel.is_closed())
    }

    pub fn is_busy(&self) -> bool {
        self.status == WorkerStatus::Busy
    }

    /// Returns true once the worker's channel has closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns true once the worker completed its startup handshake.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Returns true once reading from the worker failed.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Returns true if the coordinator asked this worker to stop.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Spawn the worker process, send `init` and wait for `online`.
    pub async fn startup(
        &mut self,
        signals: mpsc::UnboundedSender<WorkerSignal>,
    ) -> Result<(), WorkerError> {
        let id = self.id();
        let settings = &self.settings;
        debug!(
            worker_id = %id,
            path = %settings.path.display(),
            cwd = %settings.cwd.display(),
            "Spawning worker"
        );

        let mut child = Command::new(&settings.path)
            .args(&settings.args)
            .envs(&settings.env)
            .current_dir(&settings.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                id,
                path: settings.path.display().to_string(),
                source,
            })?;

        self.pid = child.id();
        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.start_kill();
                return Err(WorkerError::Spawn {
                    id,
                    path: settings.path.display().to_string(),
                    source: std::io::Error::other("worker stdio was not captured"),
                });
            }
        };

        let startup = self.attach(stdout, stdin, move |kill| wait_for_exit(id, child, kill), signals);
        self.handshake(startup).await
    }

    /// Bind the channel over an already running worker's stdio.
    pub(crate) fn attach<R, W, E, F>(
        &mut self,
        reader: R,
        writer: W,
        exit: E,
        signals: mpsc::UnboundedSender<WorkerSignal>,
    ) -> oneshot::Receiver<Startup>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
        E: FnOnce(oneshot::Receiver<()>) -> F,
        F: std::future::Future<Output = Option<i32>> + Send + 'static,
    {
        let (channel, startup) = WorkerChannel::open(self.id(), reader, writer, exit, signals);
        self.channel = Some(channel);
        self.started = false;
        self.failed = false;
        self.closed = false;
        startup
    }

    /// Send `init` and wait for the reader task to see `online`.
    pub(crate) async fn handshake(
        &mut self,
        startup: oneshot::Receiver<Startup>,
    ) -> Result<(), WorkerError> {
        let id = self.id();
        let timeout = self.settings.startup_timeout;
        let init = CoordinatorMessage::Init(InitData {
            id,
            log_level: self.settings.log_level.clone(),
            init_data: self.settings.init_data.clone(),
        });

        let Some(channel) = self.channel.as_mut() else {
            return Err(WorkerError::ExitedDuringStartup { id, code: None });
        };
        if let Err(source) = channel.send(init).await {
            // A worker that died on spawn shows up as a broken pipe here.
            warn!(worker_id = %id, error = %source, "Failed to send init");
        }

        match tokio::time::timeout(timeout, startup).await {
            Ok(Ok(Startup::Online)) => {
                self.started = true;
                info!(worker_id = %id, pid = ?self.pid, "Worker started");
                Ok(())
            }
            Ok(Ok(Startup::Failed(failure))) => {
                error!(worker_id = %id, failure = %failure, "Worker failed during startup");
                Err(WorkerError::StartupFailed { id, failure })
            }
            Ok(Ok(Startup::Closed(code))) => {
                self.closed = true;
                Err(WorkerError::ExitedDuringStartup { id, code })
            }
            Ok(Err(_)) => {
                self.closed = true;
                Err(WorkerError::ExitedDuringStartup { id, code: None })
            }
            Err(_) => {
                error!(worker_id = %id, timeout_ms = timeout.as_millis() as u64, "Worker startup timed out");
                self.shutdown_requested = true;
                channel.kill();
                Err(WorkerError::StartupTimeout {
                    id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Ask the worker to exit and wait for it. Succeeds only on exit code 0.
    ///
    /// Calling this on a worker whose channel already closed succeeds
    /// immediately.
    pub async fn shutdown(&mut self) -> Result<(), WorkerError> {
        let id = self.id();
        let Some(channel) = self.channel.as_mut() else {
            return Ok(());
        };
        if self.closed || channel.is_closed() {
            self.closed = true;
            return Ok(());
        }
        if channel.is_killed() {
            channel.closed().await;
            self.closed = true;
            return Ok(());
        }

        self.shutdown_requested = true;
        debug!(worker_id = %id, "Shutting down worker");
        if let Err(e) = channel.send(CoordinatorMessage::Shutdown).await {
            warn!(worker_id = %id, error = %e, "Failed to send shutdown");
        }

        let code = channel.closed().await;
        self.closed = true;
        match code {
            Some(0) => {
                info!(worker_id = %id, "Worker stopped");
                Ok(())
            }
            code => Err(WorkerError::NonZeroExit { id, code }),
        }
    }

    /// Hand a task to the worker. Returns false, changing nothing, if the
    /// worker is not free.
    pub async fn send_task(&mut self, task: &Task) -> bool {
        if !self.is_free() {
            return false;
        }
        let id = self.id();
        let Some(channel) = self.channel.as_mut() else {
            return false;
        };

        self.status = WorkerStatus::Busy;
        self.current_task = Some(task.id());

        match channel.send(CoordinatorMessage::Task(task.clone())).await {
            Ok(()) => {
                debug!(worker_id = %id, task_id = %task.id(), "Task sent");
                true
            }
            Err(e) => {
                error!(worker_id = %id, task_id = %task.id(), error = %e, "Failed to send task");
                self.status = WorkerStatus::Free;
                self.current_task = None;
                self.closed = true;
                false
            }
        }
    }

    /// Update status and statistics from a worker message.
    pub(crate) fn apply(&mut self, message: &WorkerMessage) {
        match message {
            WorkerMessage::TaskStarted(_) => self.stat.started += 1,
            WorkerMessage::TaskFinished(_) => self.stat.finished += 1,
            WorkerMessage::TaskError(_) => self.stat.errored += 1,
            WorkerMessage::TaskFatal(_) => self.stat.fatal += 1,
            WorkerMessage::Online | WorkerMessage::Fatal(_) | WorkerMessage::Error(_) => {}
        }

        if message.is_terminal() {
            if message.task_id() != self.current_task {
                warn!(
                    worker_id = %self.id(),
                    task_id = ?message.task_id(),
                    current = ?self.current_task,
                    "Terminal event for a task this worker is not running"
                );
            }
            self.status = WorkerStatus::Free;
            self.current_task = None;
        }
    }

    /// Record that the worker's output stream failed. The reader task has
    /// already killed the process; its close follows.
    pub(crate) fn mark_failed(&mut self) {
        self.failed = true;
    }

    /// Record that the channel closed. Returns the task that was in flight.
    pub(crate) fn mark_closed(&mut self) -> Option<TaskId> {
        self.closed = true;
        self.status = WorkerStatus::Free;
        self.current_task.take()
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.settings.id)
            .field("status", &self.status)
            .field("current_task", &self.current_task)
            .field("stat", &self.stat)
            .field("pid", &self.pid)
            .field("started", &self.started)
            .field("failed", &self.failed)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Wait for the process to exit, killing it if the kill switch fires.
async fn wait_for_exit(id: WorkerId, mut child: Child, kill: oneshot::Receiver<()>) -> Option<i32> {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            debug!(worker_id = %id, "Killing worker");
            if let Err(e) = child.start_kill() {
                warn!(worker_id = %id, error = %e, "Failed to kill worker");
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => {
            debug!(worker_id = %id, status = %status, "Worker exited");
            status.code()
        }
        Err(e) => {
            error!(worker_id = %id, error = %e, "Failed to wait for worker");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use forkpool_core::TaskId;
    use forkpool_proto::{Frame, MessageCodec};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio_util::codec::{FramedRead, FramedWrite};

    /// The far end of a handle's channel, playing the worker process.
    pub(crate) struct FakeWorker {
        pub inbox: FramedRead<DuplexStream, MessageCodec<CoordinatorMessage>>,
        pub outbox: FramedWrite<DuplexStream, MessageCodec<WorkerMessage>>,
    }

    impl FakeWorker {
        pub async fn recv(&mut self) -> CoordinatorMessage {
            match self.inbox.next().await {
                Some(Ok(Frame::Message(message))) => message,
                other => panic!("Expected coordinator message, got {:?}", other),
            }
        }

        pub async fn send(&mut self, message: WorkerMessage) {
            self.outbox.send(message).await.unwrap();
        }
    }

    pub(crate) fn settings(id: usize) -> WorkerSettings {
        PoolConfig::new(1, "/bin/fake-worker")
            .with_cwd("/tmp")
            .with_startup_timeout_ms(200)
            .for_worker(WorkerId::new(id))
    }

    /// Attach a handle to an in-memory worker. The fake process exits with
    /// `code` once its output is closed.
    pub(crate) fn attach_fake(
        handle: &mut WorkerHandle,
        code: Option<i32>,
        signals: mpsc::UnboundedSender<WorkerSignal>,
    ) -> (FakeWorker, oneshot::Receiver<Startup>) {
        let (to_worker, worker_in) = tokio::io::duplex(64 * 1024);
        let (worker_out, from_worker) = tokio::io::duplex(64 * 1024);
        let startup = handle.attach(from_worker, to_worker, move |_| async move { code }, signals);
        let fake = FakeWorker {
            inbox: FramedRead::new(worker_in, MessageCodec::new()),
            outbox: FramedWrite::new(worker_out, MessageCodec::new()),
        };
        (fake, startup)
    }

    /// A started handle with its fake worker.
    pub(crate) async fn online(
        id: usize,
        signals: mpsc::UnboundedSender<WorkerSignal>,
    ) -> (WorkerHandle, FakeWorker) {
        let mut handle = WorkerHandle::new(settings(id));
        let (mut fake, startup) = attach_fake(&mut handle, Some(0), signals);
        let (result, init) = tokio::join!(handle.handshake(startup), async {
            let init = fake.recv().await;
            fake.send(WorkerMessage::Online).await;
            init
        });
        result.unwrap();
        assert!(matches!(init, CoordinatorMessage::Init(ref data) if data.id == WorkerId::new(id)));
        (handle, fake)
    }

    #[tokio::test]
    async fn test_handshake_sends_init() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (handle, _fake) = online(2, tx).await;
        assert!(handle.is_started());
        assert!(handle.is_free());
        assert!(!handle.is_busy());
    }

    #[tokio::test]
    async fn test_startup_timeout() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = WorkerHandle::new(settings(0));
        let (_fake, startup) = attach_fake(&mut handle, Some(0), tx);

        match handle.handshake(startup).await {
            Err(WorkerError::StartupTimeout { id, timeout_ms }) => {
                assert_eq!(id, WorkerId::new(0));
                assert_eq!(timeout_ms, 200);
            }
            other => panic!("Expected startup timeout, got {:?}", other),
        }
        assert!(handle.shutdown_requested());
    }

    #[tokio::test]
    async fn test_abandoned_handshake_is_not_free() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = WorkerHandle::new(settings(0));
        let (mut fake, startup) = attach_fake(&mut handle, Some(0), tx);

        // The handshake future is dropped before `online` arrives.
        let _ = tokio::time::timeout(Duration::from_millis(20), handle.handshake(startup)).await;
        fake.recv().await;
        fake.send(WorkerMessage::Online).await;
        tokio::task::yield_now().await;

        assert!(!handle.is_started());
        assert!(!handle.is_free());
        let task = Task::new(TaskId::new(1), json!(null));
        assert!(!handle.send_task(&task).await);
    }

    #[tokio::test]
    async fn test_failed_worker_is_not_free() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (mut handle, _fake) = online(0, tx).await;
        handle.mark_failed();

        assert!(handle.is_failed());
        assert!(!handle.is_free());
        let task = Task::new(TaskId::new(1), json!(null));
        assert!(!handle.send_task(&task).await);
    }

    #[tokio::test]
    async fn test_startup_failed_on_fatal() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = WorkerHandle::new(settings(0));
        let (mut fake, startup) = attach_fake(&mut handle, Some(1), tx);

        let (result, _) = tokio::join!(handle.handshake(startup), async {
            fake.recv().await;
            fake.send(WorkerMessage::Fatal(forkpool_core::Failure::new("init hook"))).await;
        });
        assert!(matches!(result, Err(WorkerError::StartupFailed { .. })));
    }

    #[tokio::test]
    async fn test_exit_during_startup() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = WorkerHandle::new(settings(0));
        let (fake, startup) = attach_fake(&mut handle, Some(2), tx);
        drop(fake);

        match handle.handshake(startup).await {
            Err(WorkerError::ExitedDuringStartup { code, .. }) => assert_eq!(code, Some(2)),
            other => panic!("Expected exit during startup, got {:?}", other),
        }
        assert!(handle.is_closed());
        assert!(!handle.is_free());
    }

    #[tokio::test]
    async fn test_send_task_on_busy_worker_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (mut handle, mut fake) = online(0, tx).await;

        let first = Task::new(TaskId::new(1), json!("a"));
        let second = Task::new(TaskId::new(2), json!("b"));

        assert!(handle.send_task(&first).await);
        assert!(handle.is_busy());
        assert_eq!(handle.current_task(), Some(TaskId::new(1)));

        assert!(!handle.send_task(&second).await);
        assert_eq!(handle.current_task(), Some(TaskId::new(1)));
        assert_eq!(handle.stat(), WorkerStat::default());

        match fake.recv().await {
            CoordinatorMessage::Task(task) => assert_eq!(task.payload(), &json!("a")),
            other => panic!("Expected task, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_terminal_event_frees_worker() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (mut handle, _fake) = online(0, tx).await;
        let task = Task::new(TaskId::new(1), json!(null));
        assert!(handle.send_task(&task).await);

        handle.apply(&WorkerMessage::TaskStarted(task.id()));
        assert!(handle.is_busy());

        handle.apply(&WorkerMessage::TaskError(forkpool_proto::TaskFailure {
            task_id: task.id(),
            failure: forkpool_core::Failure::new("bad"),
        }));
        assert!(handle.is_free());
        assert_eq!(handle.current_task(), None);
        assert_eq!(handle.stat().started, 1);
        assert_eq!(handle.stat().errored, 1);
    }

    #[tokio::test]
    async fn test_shutdown_and_idempotency() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (mut handle, mut fake) = online(0, tx).await;

        let (result, _) = tokio::join!(handle.shutdown(), async {
            assert_eq!(fake.recv().await, CoordinatorMessage::Shutdown);
            drop(fake);
        });
        result.unwrap();
        assert!(handle.is_closed());
        assert!(handle.shutdown_requested());

        // Already closed.
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_non_zero_exit() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = WorkerHandle::new(settings(0));
        let (mut fake, startup) = attach_fake(&mut handle, Some(3), tx);
        let (result, _) = tokio::join!(handle.handshake(startup), async {
            fake.recv().await;
            fake.send(WorkerMessage::Online).await;
        });
        result.unwrap();

        let (result, _) = tokio::join!(handle.shutdown(), async {
            fake.recv().await;
            drop(fake);
        });
        assert!(matches!(result, Err(WorkerError::NonZeroExit { code: Some(3), .. })));
    }

    #[tokio::test]
    async fn test_shutdown_without_startup() {
        let mut handle = WorkerHandle::new(settings(0));
        handle.shutdown().await.unwrap();
        assert!(!handle.is_free());
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = WorkerHandle::new(
            PoolConfig::new(1, "/nonexistent/forkpool-worker")
                .with_cwd("/")
                .for_worker(WorkerId::new(0)),
        );
        assert!(matches!(
            handle.startup(tx).await,
            Err(WorkerError::Spawn { .. })
        ));
    }
}
