//! Task dispatch
//!
//! Tasks are routed by their one-byte command identifier to a registered
//! [`Handler`]. A handler decodes its own arguments and returns an
//! [`Outcome`]; the dispatcher turns that outcome, or the error, into the
//! record queued for the controller.

use crate::error::TaskError;
use crate::queue::OutboundQueue;
use crate::relay::LinkRelay;
use crate::transfer::TransferManager;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tether_proto::{records, Cursor, Message, ProtocolError, TaskId, TaskRecord, WireId};
use tether_transport::{Pacing, TransportSelector};
use tracing::{debug, warn};

/// A task copied out of a tasking reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Command identifier
    pub command: u8,
    /// Controller task id
    pub id: TaskId,
    /// Argument bytes
    pub args: Bytes,
}

impl Task {
    /// Create a task
    pub fn new(command: u8, id: TaskId, args: impl Into<Bytes>) -> Self {
        Self {
            command,
            id,
            args: args.into(),
        }
    }

    /// Decode the argument header
    pub fn arguments(&self) -> Result<Args<'_>, ProtocolError> {
        Args::parse(&self.args)
    }
}

impl From<&TaskRecord<'_>> for Task {
    fn from(record: &TaskRecord<'_>) -> Self {
        Self::new(record.command, record.task, Bytes::copy_from_slice(record.args))
    }
}

/// Argument reader: a `u32` count followed by the fields.
///
/// An empty argument buffer reads as a count of zero.
pub struct Args<'a> {
    count: u32,
    cursor: Cursor<'a>,
}

impl<'a> Args<'a> {
    /// Read the count and position on the first field
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(bytes);
        let count = if cursor.is_empty() { 0 } else { cursor.read_u32()? };
        Ok(Self { count, cursor })
    }

    /// Declared argument count
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Nothing to do
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Next length-prefixed text field
    pub fn string(&mut self) -> Result<&'a str, ProtocolError> {
        self.cursor.read_string()
    }

    /// Next big-endian `u32`
    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.cursor.read_u32()
    }

    /// Next length-prefixed identifier
    pub fn id(&mut self) -> Result<WireId, ProtocolError> {
        self.cursor.read_sized_id()
    }
}

/// What a handler produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Finished; queue a completion carrying this output
    Complete(Vec<u8>),
    /// Still running; the handler's component reports later
    Deferred,
    /// Nothing to do; no result is sent
    Skipped,
}

impl Outcome {
    /// Completion with no output
    pub fn done() -> Self {
        Self::Complete(Vec::new())
    }
}

/// State handlers act on
pub struct TaskContext {
    /// Outbound records
    pub queue: Arc<OutboundQueue>,
    /// Endpoint health and delivery
    pub selector: Arc<TransportSelector>,
    /// Cycle pacing, also used between transport retries
    pub pacing: Pacing,
    /// Active uploads and downloads
    pub transfers: TransferManager,
    /// Linked peers
    pub relay: LinkRelay,
    /// Working directory for relative paths
    pub cwd: PathBuf,
    /// Channel name used when a link task does not give one
    pub default_channel: String,
    /// Set once the controller asked the agent to stop
    pub stop: bool,
}

impl TaskContext {
    /// Resolve `path` against the working directory
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }
}

/// Handler trait for processing tasks
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle a task
    async fn handle(&self, ctx: &mut TaskContext, task: &Task) -> Result<Outcome, TaskError>;
}

/// Routes tasks to handlers by command identifier
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<u8, Arc<dyn Handler>>,
}

impl Dispatcher {
    /// Create a dispatcher with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a command
    pub fn register(&mut self, command: u8, handler: Arc<dyn Handler>) {
        debug!("Registered handler for command 0x{:02x}", command);
        self.handlers.insert(command, handler);
    }

    /// Whether a command has a handler
    pub fn handles(&self, command: u8) -> bool {
        self.handlers.contains_key(&command)
    }

    /// Run one task and queue its result
    pub async fn dispatch(&self, ctx: &mut TaskContext, task: &Task) {
        let Some(handler) = self.handlers.get(&task.command).cloned() else {
            warn!("Ignoring task {} with unknown command 0x{:02x}", task.id, task.command);
            return;
        };

        debug!("Dispatching task {} (command 0x{:02x}, {} argument bytes)", task.id, task.command, task.args.len());
        let result = match handler.handle(ctx, task).await {
            Ok(Outcome::Complete(output)) => Self::completion(&ctx.queue, task, &output),
            Ok(Outcome::Deferred) => {
                debug!("Task {} continues in the background", task.id);
                return;
            }
            Ok(Outcome::Skipped) => {
                debug!("Task {} had nothing to do", task.id);
                return;
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(record) => ctx.queue.enqueue(record).await,
            Err(e) => {
                warn!("Task {} failed: {}", task.id, e);
                ctx.queue.submit(records::error(&task.id, e.code())).await;
            }
        }
    }

    /// Build the completion record, or fail if no request could carry it
    fn completion(queue: &OutboundQueue, task: &Task, output: &[u8]) -> Result<Message, TaskError> {
        let record = records::completion(&task.id, output)?;
        if !queue.fits(record.len()) {
            return Err(TaskError::OutputTooLarge {
                size: record.len(),
                max: queue.max_bytes(),
            });
        }
        Ok(record)
    }
}
