//! Client error types.

use thiserror::Error;

/// A non-zero instrument return code where the request was meant to succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{device} {operation} failed (rc {code}): {message}")]
pub struct DeviceError {
    pub device: &'static str,
    pub operation: &'static str,
    pub code: i32,
    pub message: String,
}

impl DeviceError {
    pub fn new(
        device: &'static str,
        operation: &'static str,
        code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            device,
            operation,
            code,
            message: message.into(),
        }
    }
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timeout")]
    Timeout,

    #[error("connection closed after {received} of {expected} bytes")]
    ConnectionClosed { expected: usize, received: usize },

    #[error("protocol error: {0}")]
    Protocol(#[from] sara_protocol::ProtocolError),

    #[error(
        "reply out of sync: sent opcode {sent_opcode} id {sent_id}, got opcode {got_opcode} id {got_id}"
    )]
    ProtocolDesync {
        sent_opcode: u32,
        sent_id: i32,
        got_opcode: u32,
        got_id: i32,
    },

    #[error("data loss on {what}: expected {expected} bytes, got {actual}")]
    DataLoss {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("session unusable after an earlier fatal error")]
    SessionUnusable,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("no image captured: ring holds {frames} frames")]
    NoImageCaptured { frames: i32 },
}

impl ClientError {
    /// Returns whether the session's byte stream can no longer be trusted.
    ///
    /// Nothing in this crate retries; a fatal error means the connection
    /// should be closed.
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::Connect { .. }
            | ClientError::ConnectTimeout(_)
            | ClientError::Io(_)
            | ClientError::Timeout
            | ClientError::ConnectionClosed { .. }
            | ClientError::ProtocolDesync { .. }
            | ClientError::DataLoss { .. }
            | ClientError::SessionUnusable => true,
            ClientError::Protocol(e) => matches!(
                e,
                sara_protocol::ProtocolError::MalformedFrame { .. }
                    | sara_protocol::ProtocolError::FrameTooLarge { .. }
                    | sara_protocol::ProtocolError::Io(_)
            ),
            _ => false,
        }
    }

    /// Returns the instrument return code, if this is a device error.
    pub fn device_code(&self) -> Option<i32> {
        match self {
            ClientError::Device(e) => Some(e.code),
            _ => None,
        }
    }
}
