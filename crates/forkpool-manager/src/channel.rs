//! Coordinator side of the message channel to one worker process.
//!
//! The write half stays with the [`WorkerHandle`](crate::WorkerHandle). The
//! read half is driven by a spawned reader task that parses frames and
//! forwards them to the manager as [`WorkerSignal`]s; it never touches pool or
//! queue state.

use std::future::Future;

use forkpool_core::{Failure, WorkerId};
use forkpool_proto::{CoordinatorMessage, Frame, MessageCodec, ProtocolError, WorkerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, trace, warn};

/// Something a worker's reader task observed.
#[derive(Debug)]
pub struct WorkerSignal {
    pub worker_id: WorkerId,
    pub kind: SignalKind,
}

#[derive(Debug)]
pub enum SignalKind {
    /// A decoded worker message (other than `online`).
    Message(WorkerMessage),

    /// A line that is not a valid worker message, or a failure of the stream
    /// itself. After a stream failure nothing more is read and the process
    /// is killed.
    Violation(ProtocolError),

    /// The channel closed and the process exited.
    Closed { code: Option<i32> },
}

/// Outcome of the startup handshake as seen by the reader task.
#[derive(Debug)]
pub(crate) enum Startup {
    Online,
    Failed(Failure),
    Closed(Option<i32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitState {
    Running,
    Exited(Option<i32>),
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write half of a worker channel plus the process exit watch.
pub(crate) struct WorkerChannel {
    writer: FramedWrite<BoxedWriter, MessageCodec<CoordinatorMessage>>,
    exit: watch::Receiver<ExitState>,
    kill: Option<oneshot::Sender<()>>,
}

impl WorkerChannel {
    /// Bind a channel over `reader`/`writer` and spawn its reader task.
    ///
    /// `exit` builds the future that resolves with the process exit code. It
    /// receives a kill switch that fires when [`WorkerChannel::kill`] is called,
    /// the channel is dropped, or reading from the worker fails.
    pub(crate) fn open<R, W, E, F>(
        worker_id: WorkerId,
        reader: R,
        writer: W,
        exit: E,
        signals: mpsc::UnboundedSender<WorkerSignal>,
    ) -> (Self, oneshot::Receiver<Startup>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
        E: FnOnce(oneshot::Receiver<()>) -> F,
        F: Future<Output = Option<i32>> + Send + 'static,
    {
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (fire_tx, fire_rx) = oneshot::channel();
        let (broken_tx, broken_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(ExitState::Running);
        let (startup_tx, startup_rx) = oneshot::channel();

        let frames = FramedRead::new(reader, MessageCodec::<WorkerMessage>::new());
        let exited = exit(fire_rx);

        tokio::spawn(async move {
            let reading = read_frames(worker_id, frames, startup_tx, broken_tx, signals.clone());
            let exiting = async move {
                tokio::pin!(exited);
                tokio::select! {
                    code = &mut exited => return code,
                    _ = kill_rx => {}
                    Ok(()) = broken_rx => {
                        warn!(worker_id = %worker_id, "Killing worker after stream failure");
                    }
                }
                let _ = fire_tx.send(());
                exited.await
            };
            let (startup_tx, code) = tokio::join!(reading, exiting);
            debug!(worker_id = %worker_id, code = ?code, "Worker channel closed");

            let _ = exit_tx.send(ExitState::Exited(code));
            if let Some(tx) = startup_tx {
                let _ = tx.send(Startup::Closed(code));
            }
            let _ = signals.send(WorkerSignal {
                worker_id,
                kind: SignalKind::Closed { code },
            });
        });

        let channel = Self {
            writer: FramedWrite::new(Box::new(writer) as BoxedWriter, MessageCodec::new()),
            exit: exit_rx,
            kill: Some(kill_tx),
        };
        (channel, startup_rx)
    }

    /// Write one message to the worker.
    pub(crate) async fn send(&mut self, message: CoordinatorMessage) -> Result<(), ProtocolError> {
        trace!(kind = forkpool_proto::Message::kind(&message), "Sending message");
        self.writer.send(message).await
    }

    /// Returns true once the process has exited.
    pub(crate) fn is_closed(&self) -> bool {
        matches!(*self.exit.borrow(), ExitState::Exited(_))
    }

    /// Wait for the process to exit and return its exit code.
    pub(crate) async fn closed(&mut self) -> Option<i32> {
        match self.exit.wait_for(|s| matches!(s, ExitState::Exited(_))).await {
            Ok(state) => match *state {
                ExitState::Exited(code) => code,
                ExitState::Running => None,
            },
            // Reader task is gone without reporting.
            Err(_) => None,
        }
    }

    /// Returns true once the kill switch has fired.
    pub(crate) fn is_killed(&self) -> bool {
        self.kill.is_none()
    }

    /// Fire the kill switch.
    pub(crate) fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

/// Forward frames until EOF or a stream failure. Returns the startup sender if
/// `online` never came.
async fn read_frames<R>(
    worker_id: WorkerId,
    mut frames: FramedRead<R, MessageCodec<WorkerMessage>>,
    startup: oneshot::Sender<Startup>,
    broken: oneshot::Sender<()>,
    signals: mpsc::UnboundedSender<WorkerSignal>,
) -> Option<oneshot::Sender<Startup>>
where
    R: AsyncRead + Unpin,
{
    let mut startup = Some(startup);

    while let Some(frame) = frames.next().await {
        let kind = match frame {
            Ok(Frame::Message(WorkerMessage::Online)) => {
                match startup.take() {
                    Some(tx) => {
                        debug!(worker_id = %worker_id, "Worker online");
                        let _ = tx.send(Startup::Online);
                    }
                    None => warn!(worker_id = %worker_id, "Duplicate online message"),
                }
                continue;
            }
            Ok(Frame::Message(message)) => {
                if let WorkerMessage::Fatal(failure) | WorkerMessage::Error(failure) = &message {
                    if let Some(tx) = startup.take() {
                        let _ = tx.send(Startup::Failed(failure.clone()));
                    }
                }
                SignalKind::Message(message)
            }
            Ok(Frame::Invalid(err)) => {
                warn!(worker_id = %worker_id, error = %err, "Protocol violation");
                if let Some(tx) = startup.take() {
                    let failure = Failure::new(err.to_string()).with_code("PROTOCOL_VIOLATION");
                    let _ = tx.send(Startup::Failed(failure));
                }
                SignalKind::Violation(err)
            }
            Err(err) => {
                error!(worker_id = %worker_id, error = %err, "Worker stream failed");
                if let Some(tx) = startup.take() {
                    let failure = Failure::new(err.to_string()).with_code("CHANNEL_FAILED");
                    let _ = tx.send(Startup::Failed(failure));
                }
                let _ = signals.send(WorkerSignal {
                    worker_id,
                    kind: SignalKind::Violation(err),
                });
                let _ = broken.send(());
                break;
            }
        };

        if signals.send(WorkerSignal { worker_id, kind }).is_err() {
            debug!(worker_id = %worker_id, "Manager gone, stop reading");
            break;
        }
    }

    startup
}
