//! forkpool coordinator.
//!
//! The [`Manager`] owns a fixed-size [`WorkerPool`] of worker processes, a
//! [`TaskQueue`] and the [`Director`] that hands queued tasks to free
//! workers. Each worker is driven over newline-delimited JSON on its stdio.

pub mod channel;
pub mod config;
pub mod director;
pub mod error;
pub mod manager;
pub mod pool;
pub mod queue;
pub mod worker;

pub use channel::{SignalKind, WorkerSignal};
pub use config::{ConfigError, PoolConfig, WorkerConfig, WorkerSettings};
pub use director::Director;
pub use error::{ManagerError, WorkerError};
pub use manager::{Manager, PoolEvent};
pub use pool::WorkerPool;
pub use queue::TaskQueue;
pub use worker::WorkerHandle;
