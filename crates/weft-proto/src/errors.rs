//! Error types for the weft wire formats.
//!
//! All errors are structured and testable. Decoders never panic on untrusted
//! input; every malformed byte sequence maps to one of the variants below.

use thiserror::Error;

/// Errors produced while encoding or decoding wire messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A credential or candidate payload ended before its declared length
    #[error("payload truncated: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum number of bytes the payload claimed to contain
        expected: usize,
        /// Bytes actually present
        actual: usize,
    },

    /// Payload exceeds the maximum allowed size
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// A text field was not valid UTF-8
    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 {
        /// Which field failed to decode
        field: &'static str,
    },

    /// Unknown signal body kind tag
    #[error("unknown body kind: {0}")]
    UnknownBodyKind(u8),

    /// Failed to encode a message as CBOR
    #[error("failed to encode CBOR: {0}")]
    CborEncode(String),

    /// Failed to decode a message from CBOR
    #[error("failed to decode CBOR: {0}")]
    CborDecode(String),
}

/// Convenient Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
