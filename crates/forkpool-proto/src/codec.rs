//! Newline-delimited JSON framing for channel messages.
//!
//! Use with `tokio_util::codec::{FramedRead, FramedWrite}` over the two halves
//! of a worker's stdio. Each direction has its own message type, so a read
//! half and a write half usually carry different `MessageCodec` parameters.

use std::marker::PhantomData;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::error::ProtocolError;
use crate::message::{decode_message, encode_message, Message};

/// Maximum length of a single encoded message line.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// A decoded frame.
///
/// A line that does not decode into a known message is yielded as
/// [`Frame::Invalid`] instead of a decoder error, so one bad message does not
/// terminate the stream. Stream-level failures (IO, oversized frame) are
/// returned as decoder errors.
#[derive(Debug)]
pub enum Frame<T> {
    Message(T),
    Invalid(ProtocolError),
}

/// Codec carrying messages of type `T`, one JSON document per line.
#[derive(Debug)]
pub struct MessageCodec<T> {
    lines: LinesCodec,
    max_length: usize,
    _message: PhantomData<fn() -> T>,
}

impl<T> MessageCodec<T> {
    /// Create a codec with the default maximum frame length.
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_LENGTH)
    }

    /// Create a codec with a custom maximum frame length.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            max_length,
            _message: PhantomData,
        }
    }
}

impl<T> MessageCodec<T> {
    /// Maximum length of one line, in bytes.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn stream_error(&self, err: LinesCodecError) -> ProtocolError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => ProtocolError::FrameTooLarge(self.max_length),
            LinesCodecError::Io(e) => ProtocolError::Io(e),
        }
    }
}

impl<T> Default for MessageCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Message> MessageCodec<T> {
    fn frame(line: String) -> Option<Frame<T>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(match decode_message::<T>(trimmed) {
            Ok(message) => Frame::Message(message),
            Err(e) => Frame::Invalid(e),
        })
    }
}

impl<T: Message> Decoder for MessageCodec<T> {
    type Item = Frame<T>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(line) = self.lines.decode(src).map_err(|e| self.stream_error(e))? {
            if let Some(frame) = Self::frame(line) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(line) = self
            .lines
            .decode_eof(src)
            .map_err(|e| self.stream_error(e))?
        {
            if let Some(frame) = Self::frame(line) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }
}

impl<T: Message> Encoder<T> for MessageCodec<T> {
    type Error = ProtocolError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = encode_message(&item)?;
        self.lines
            .encode(json, dst)
            .map_err(|e| self.stream_error(e))?;
        Ok(())
    }
}
