//! Error types for the agent

use std::io;
use tether_proto::ProtocolError;
use tether_transport::TransportError;
use thiserror::Error;

/// Code reported when a download cannot continue
pub const DOWNLOAD_FAILED: u32 = 1111;
/// Code reported when an upload cannot continue
pub const UPLOAD_FAILED: u32 = 1112;
/// Code reported when a link cannot be established
pub const LINK_FAILED: u32 = 1113;
/// Code reported for malformed task arguments
pub const INVALID_DATA: u32 = 13;
/// Code reported when a result cannot fit in one request (EFBIG)
pub const OUTPUT_TOO_LARGE: u32 = 27;

/// A task failure, reported to the controller as a numeric code
#[derive(Debug, Error)]
pub enum TaskError {
    /// Local file operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Download could not continue
    #[error("Download failed: {0}")]
    Download(String),

    /// Upload could not continue
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Peer link could not be established
    #[error("Link failed: {0}")]
    Link(#[from] TransportError),

    /// Arguments did not decode
    #[error("Invalid arguments: {0}")]
    InvalidArguments(#[from] ProtocolError),

    /// Result is larger than a request may carry
    #[error("Output of {size} bytes exceeds the {max} byte request cap")]
    OutputTooLarge {
        /// Encoded record size
        size: usize,
        /// Request cap
        max: usize,
    },
}

impl TaskError {
    /// Numeric code sent in the error record
    pub fn code(&self) -> u32 {
        match self {
            Self::Io(e) => e.raw_os_error().map_or(1, |c| c as u32),
            Self::Download(_) => DOWNLOAD_FAILED,
            Self::Upload(_) => UPLOAD_FAILED,
            Self::Link(TransportError::Io(e)) => e.raw_os_error().map_or(LINK_FAILED, |c| c as u32),
            Self::Link(_) => LINK_FAILED,
            Self::InvalidArguments(_) => INVALID_DATA,
            Self::OutputTooLarge { .. } => OUTPUT_TOO_LARGE,
        }
    }
}

/// Session-level failures
#[derive(Debug, Error)]
pub enum AgentError {
    /// Message could not be built or a reply could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport setup failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The controller did not accept the checkin
    #[error("Checkin failed: {0}")]
    Checkin(String),

    /// Configuration is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
