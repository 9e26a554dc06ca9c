//! Error types for the livecast network protocol.

use thiserror::Error;

/// Protocol-level errors that can occur during communication.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Invalid magic bytes in frame header.
    #[error("Invalid magic bytes: expected 'LCST', got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Message type is unknown or unsupported.
    #[error("Unknown message type: 0x{0:04X}")]
    UnknownMessageType(u16),

    /// Message type is valid but not expected in this direction.
    #[error("Unexpected message type: 0x{0:04X}")]
    UnexpectedMessageType(u16),

    /// Frame payload is too large.
    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(u32, u32),

    /// Frame payload is incomplete.
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// Failed to decode message payload.
    #[error("Failed to decode message: {0}")]
    DecodeError(String),
}

/// Error code sent in response messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    /// Operation succeeded.
    Success = 0x0000,
    /// Unknown error occurred.
    Unknown = 0x0001,
    /// Invalid session state.
    InvalidState = 0x0006,
    /// Protocol error.
    ProtocolError = 0x0008,
    /// Client speaks a protocol version the server does not.
    VersionMismatch = 0x0009,
}

impl From<u16> for ErrorCode {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => ErrorCode::Success,
            0x0006 => ErrorCode::InvalidState,
            0x0008 => ErrorCode::ProtocolError,
            0x0009 => ErrorCode::VersionMismatch,
            _ => ErrorCode::Unknown,
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(value: ErrorCode) -> Self {
        value as u16
    }
}

impl ErrorCode {
    /// Returns true if this error code indicates success.
    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }
}
