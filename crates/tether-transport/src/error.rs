//! Transport error types

use std::io;
use thiserror::Error;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the endpoint
    #[error("Connection error: {0}")]
    Connection(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// The peer closed the channel or the pipe broke
    #[error("Channel broken")]
    ChannelBroken,

    /// A frame exceeded the configured maximum
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared frame size
        size: usize,
        /// Maximum accepted size
        max: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TransportError {
    /// Whether the error means the other side is gone for good
    pub fn is_broken(&self) -> bool {
        match self {
            Self::ChannelBroken => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
