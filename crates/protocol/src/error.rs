//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering encoding and framing failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize an envelope.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize an envelope or frame.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Frame exceeds maximum allowed size.
    #[error("frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Frame does not start with the expected magic bytes.
    #[error("invalid frame magic: expected {expected:#010x}, got {got:#010x}")]
    InvalidFrameMagic {
        /// Expected magic value.
        expected: u32,
        /// Actual magic value received.
        got: u32,
    },

    /// Envelope was produced by an incompatible protocol version.
    #[error("unsupported protocol version {got}, expected {expected}")]
    VersionMismatch {
        /// Version this build speaks.
        expected: u8,
        /// Version found in the envelope.
        got: u8,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        ProtocolError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        ProtocolError::Deserialization(err.to_string())
    }
}
