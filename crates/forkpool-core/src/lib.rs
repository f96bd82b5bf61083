//! forkpool Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Process spawning
//! - The wire protocol
//! - Runtime specifics
//!
//! All types here describe tasks and workers as the coordinator sees them.

pub mod error;
pub mod event;
pub mod ids;
pub mod status;
pub mod task;
pub mod worker;

// Re-export commonly used types
pub use error::CoreError;
pub use event::TaskEvent;
pub use ids::{TaskId, WorkerId};
pub use status::{TaskStatus, WorkerStatus};
pub use task::{Failure, Task};
pub use worker::WorkerStat;
