//! Message Channel protocol for forkpool.
//!
//! Coordinator and worker exchange `{ "type": ..., "data": ... }` envelopes,
//! one JSON document per line, over the worker's stdin and stdout.
//!
//! This crate contains:
//! - The message enums for both directions
//! - Strict decoding that rejects unknown message types
//! - A `tokio-util` codec for framing messages over any async byte stream

pub mod codec;
pub mod error;
pub mod message;

// Re-export commonly used types
pub use codec::{Frame, MessageCodec, MAX_FRAME_LENGTH};
pub use error::ProtocolError;
pub use message::{
    decode_message, encode_message, CoordinatorMessage, InitData, Message, TaskFailure,
    TaskOutcome, WorkerMessage,
};
