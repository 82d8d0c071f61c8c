//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors raised while framing or (de)serializing payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: expected {expected} bytes, got {actual}")]
    MalformedFrame { expected: usize, actual: usize },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("{record}: payload is {actual} bytes, schema needs {expected}")]
    SizeMismatch {
        record: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{record}: expected {expected} values, got {actual}")]
    FieldCount {
        record: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{record}: value for field '{field}' has the wrong wire type")]
    FieldType {
        record: &'static str,
        field: &'static str,
    },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid text reply: {0}")]
    InvalidText(String),

    #[error("text command too long: {len} bytes (max {max})")]
    CommandTooLong { len: usize, max: usize },

    #[error("row pitch of {pitch} bytes is shorter than a row of {row_bytes} bytes")]
    InvalidPitch { pitch: usize, row_bytes: usize },

    #[error("invalid raw image file: {0}")]
    InvalidRawFile(String),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
