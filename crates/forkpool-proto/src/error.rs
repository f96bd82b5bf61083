//! Protocol error types.

use thiserror::Error;

/// Errors raised while framing, encoding or decoding channel messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// IO error on the underlying stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A line exceeded the maximum frame length.
    #[error("Frame exceeds maximum length of {0} bytes")]
    FrameTooLarge(usize),

    /// The line is not a JSON document.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// The envelope carries no string `type` field.
    #[error("Message without type: {0}")]
    MissingType(String),

    /// The envelope type is not recognized for this direction.
    #[error("Unknown message type '{0}'")]
    UnknownType(String),

    /// The envelope type is known but its data does not match.
    #[error("Invalid payload for '{kind}': {reason}")]
    InvalidPayload { kind: String, reason: String },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Returns true if the error concerns a single message rather than the stream.
    pub fn is_message_level(&self) -> bool {
        matches!(
            self,
            ProtocolError::Malformed(_)
                | ProtocolError::MissingType(_)
                | ProtocolError::UnknownType(_)
                | ProtocolError::InvalidPayload { .. }
        )
    }
}
