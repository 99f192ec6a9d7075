//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A read asked for more bytes than the buffer has left
    #[error("Truncated input: needed {needed} bytes, {remaining} remaining")]
    TruncatedInput {
        /// Bytes the read required
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// Growing a message buffer failed
    #[error("Allocation failure while growing message")]
    AllocationFailure,

    /// The reply was addressed to a different session
    #[error("Identity mismatch: expected {expected}, received {received}")]
    IdentityMismatch {
        /// Session id we hold
        expected: String,
        /// Session id the reply carried
        received: String,
    },

    /// A 36-byte identifier field was not printable ASCII
    #[error("Invalid identifier")]
    InvalidIdentifier,

    /// Text or base64 decoding failed
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// A field does not fit its 32-bit length prefix
    #[error("Field too large: {size} bytes")]
    FieldTooLarge {
        /// Size of the offending field
        size: usize,
    },

    /// A record carried a kind byte we do not understand
    #[error("Unknown record kind: 0x{0:02x}")]
    UnknownRecord(u8),

    /// A record's declared layout is inconsistent
    #[error("Malformed record: {0}")]
    MalformedRecord(&'static str),

    /// The controller refused the checkin
    #[error("Checkin rejected with status {0}")]
    CheckinRejected(u8),
}

impl ProtocolError {
    /// Whether the failure came from reading past the end of a buffer
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::TruncatedInput { .. })
    }
}
