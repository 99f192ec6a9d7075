//! # Tether Agent
//!
//! Session side of the tether protocol: the outbound queue, the session
//! loop, task dispatch and the built-in handlers, chunked transfers and
//! the relay for linked peer agents.

#![warn(missing_docs)]

/// Agent configuration
pub mod config;

/// Task dispatch and handler context
pub mod dispatch;

/// Error types and the codes reported to the controller
pub mod error;

/// Built-in task handlers
pub mod handlers;

/// Host identity for checkin
pub mod host;

/// Outbound message queue
pub mod queue;

/// Relay for linked peer agents
pub mod relay;

/// Session loop
pub mod session;

/// Chunked uploads and downloads
pub mod transfer;

pub use config::{AgentConfig, ConfigError};
pub use dispatch::{Dispatcher, Handler, Outcome, Task, TaskContext};
pub use error::{AgentError, TaskError};
pub use queue::OutboundQueue;
pub use relay::LinkRelay;
pub use session::Session;
pub use transfer::{TransferManager, UploadChunk};
