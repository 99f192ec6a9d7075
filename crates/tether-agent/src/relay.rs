//! Relay for linked peer agents
//!
//! A peer opens every message it writes with its 4-byte link id. The
//! relay checks that id, tags the rest with the peer's session and queues
//! it for the controller. Bytes the controller addresses to a peer are
//! written to its channel untouched.

use crate::error::TaskError;
use crate::queue::OutboundQueue;
use bytes::Bytes;
use std::sync::Arc;
use tether_proto::wire::LINK_ID_LEN;
use tether_proto::{records, SessionId, TaskId};
use tether_transport::{ChannelConnector, LocalChannel, TransportError};
use tracing::{debug, info, warn};

/// Messages read from one link per pump
pub const PUMP_LIMIT: usize = 30;

struct Link {
    id: u32,
    peer: Option<SessionId>,
    task: TaskId,
    channel: Box<dyn LocalChannel>,
}

/// Registry of linked peers, in link order
pub struct LinkRelay {
    links: Vec<Link>,
    connector: Arc<dyn ChannelConnector>,
    queue: Arc<OutboundQueue>,
}

fn link_id(message: &[u8]) -> Option<u32> {
    let prefix: [u8; LINK_ID_LEN] = message.get(..LINK_ID_LEN)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix))
}

impl LinkRelay {
    /// Create an empty relay
    pub fn new(connector: Arc<dyn ChannelConnector>, queue: Arc<OutboundQueue>) -> Self {
        Self {
            links: Vec::new(),
            connector,
            queue,
        }
    }

    /// Number of links
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether no peer is linked
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Link ids, in link order
    pub fn link_ids(&self) -> Vec<u32> {
        self.links.iter().map(|link| link.id).collect()
    }

    /// Session of the peer behind `link_id`, once synced
    pub fn peer_of(&self, link_id: u32) -> Option<SessionId> {
        self.links.iter().find(|link| link.id == link_id)?.peer
    }

    /// Connect to a peer and read its handshake.
    ///
    /// Returns the link id and the handshake bytes that follow it, which
    /// are the peer's own checkin for the controller.
    pub async fn connect(&mut self, task: &TaskId, target: &str, name: &str) -> Result<(u32, Bytes), TaskError> {
        let mut channel = self.connector.connect(target, name).await?;
        let handshake = channel.recv().await?;
        let id = link_id(&handshake).ok_or_else(|| {
            TransportError::Connection(format!("{}: handshake of {} bytes has no link id", name, handshake.len()))
        })?;

        if self.links.iter().any(|link| link.id == id) {
            warn!("Link id {:08x} registered twice; the older link answers first", id);
        }
        info!("Linked peer on {}/{} as {:08x}", target, name, id);
        self.links.push(Link {
            id,
            peer: None,
            task: *task,
            channel,
        });
        Ok((id, handshake.slice(LINK_ID_LEN..)))
    }

    /// Attach the session the controller assigned to the peer behind
    /// `link_id` and complete the task that created the link
    pub async fn checkin_sync(&mut self, link_id: u32, peer: &SessionId) -> bool {
        let Some(link) = self.links.iter_mut().find(|link| link.id == link_id) else {
            warn!("Checkin for unknown link {:08x}", link_id);
            return false;
        };
        link.peer = Some(*peer);
        let task = link.task;
        info!("Link {:08x} synced to session {}", link_id, peer);
        self.queue.submit(records::completion(&task, &[])).await;
        true
    }

    /// Write `message` to the peer with session `peer`.
    ///
    /// Returns false when no link carries that session or the channel
    /// broke; a broken link is evicted.
    pub async fn forward(&mut self, peer: &SessionId, message: &[u8]) -> bool {
        let Some(index) = self.links.iter().position(|link| link.peer.as_ref() == Some(peer)) else {
            warn!("No link for session {}, dropping {} bytes", peer, message.len());
            return false;
        };
        match self.links[index].channel.send(message).await {
            Ok(()) => {
                debug!("Forwarded {} bytes to link {:08x}", message.len(), self.links[index].id);
                true
            }
            Err(e) => {
                warn!("Link {:08x} write failed: {}", self.links[index].id, e);
                self.evict(index).await;
                false
            }
        }
    }

    /// Queue what every synced peer has written, up to [`PUMP_LIMIT`]
    /// messages per link; broken links are evicted
    pub async fn pump(&mut self) {
        let mut index = 0;
        while index < self.links.len() {
            if self.pump_link(index).await {
                index += 1;
            } else {
                self.evict(index).await;
            }
        }
    }

    async fn pump_link(&mut self, index: usize) -> bool {
        let link = &mut self.links[index];
        // an unsynced peer's messages wait in its channel until checkin_sync
        let Some(peer) = link.peer else {
            return true;
        };
        for _ in 0..PUMP_LIMIT {
            let message = match link.channel.try_recv().await {
                Ok(Some(message)) => message,
                Ok(None) => return true,
                Err(e) => {
                    warn!("Link {:08x} read failed: {}", link.id, e);
                    return false;
                }
            };
            match link_id(&message) {
                None => {
                    debug!("Link {:08x}: discarding {} byte runt", link.id, message.len());
                }
                Some(id) if id != link.id => {
                    warn!("Link {:08x}: discarding message stamped {:08x}", link.id, id);
                }
                Some(_) => {
                    self.queue
                        .submit(records::delegate(&peer, &message[LINK_ID_LEN..]))
                        .await;
                }
            }
        }
        true
    }

    /// Drop the link with `link_id`; returns false if there is none
    pub async fn unlink(&mut self, link_id: u32) -> bool {
        match self.links.iter().position(|link| link.id == link_id) {
            Some(index) => {
                self.evict(index).await;
                true
            }
            None => false,
        }
    }

    async fn evict(&mut self, index: usize) {
        let link = self.links.remove(index);
        info!("Unlinked {:08x}", link.id);
        self.queue
            .submit(records::unlink_notice(link.id, link.peer.as_ref()))
            .await;
    }
}
