//! Outbound message queue
//!
//! Records produced anywhere in the agent are queued here and leave in
//! batches. A flush is two-phase: [`OutboundQueue::begin_flush`] marks the
//! records it packs as sent and hands back the batch, then the caller
//! either [`commit`](OutboundQueue::commit)s after a successful exchange
//! or [`rollback`](OutboundQueue::rollback)s, which restores the queue to
//! exactly its previous state.

use std::collections::VecDeque;
use tether_proto::{records, Message, ProtocolError, SessionId, ID_LEN};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Session prefix plus kind byte at the front of every batch
const BATCH_HEADER_LEN: usize = ID_LEN + 1;

/// Insertion-ordered queue of outbound records, safe for concurrent producers
pub struct OutboundQueue {
    pending: Mutex<VecDeque<Message>>,
    max_bytes: usize,
}

impl OutboundQueue {
    /// Create a queue whose batches never exceed `max_bytes`
    pub fn new(max_bytes: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            max_bytes,
        }
    }

    /// Batch size cap
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Whether a record of `len` bytes fits in a batch on its own
    pub fn fits(&self, len: usize) -> bool {
        BATCH_HEADER_LEN + len <= self.max_bytes
    }

    /// Append a record at the tail; empty messages are ignored
    pub async fn enqueue(&self, message: Message) {
        if message.is_empty() {
            return;
        }
        self.pending.lock().await.push_back(message);
    }

    /// Enqueue a freshly built record, dropping it if building failed
    pub async fn submit(&self, built: Result<Message, ProtocolError>) {
        match built {
            Ok(message) => self.enqueue(message).await,
            Err(e) => error!("Dropping outbound record: {}", e),
        }
    }

    /// Number of queued records
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Whether nothing is queued
    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Pack queued records into one batch for `session`.
    ///
    /// Records are taken in order until the next one would push the batch
    /// past the cap; it and everything after it stay queued. A record that
    /// could never fit, even alone, is discarded. Returns `None` when
    /// nothing was packed.
    pub async fn begin_flush(&self, session: &SessionId) -> Result<Option<Message>, ProtocolError> {
        let mut pending = self.pending.lock().await;

        let cap = self.max_bytes;
        pending.retain(|message| {
            let fits = self.fits(message.len());
            if !fits {
                error!(
                    "Discarding {} byte record, larger than the {} byte request cap",
                    message.len(),
                    cap
                );
            }
            fits
        });

        if pending.is_empty() {
            return Ok(None);
        }

        let mut batch = records::batch(session)?;
        let mut packed = 0usize;
        let mut failure = None;
        for message in pending.iter_mut() {
            if batch.len() + message.len() > cap {
                break;
            }
            if let Err(e) = batch.append(message) {
                failure = Some(e);
                break;
            }
            message.set_sent(true);
            packed += 1;
        }
        if let Some(e) = failure {
            pending.iter_mut().for_each(|message| message.set_sent(false));
            return Err(e);
        }

        if packed < pending.len() {
            debug!(
                "Packed {} of {} records ({} bytes), deferring the rest",
                packed,
                pending.len(),
                batch.len()
            );
        } else {
            debug!("Packed {} records ({} bytes)", packed, batch.len());
        }
        Ok(Some(batch))
    }

    /// Drop every record included in the last batch; returns how many
    pub async fn commit(&self) -> usize {
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|message| !message.is_sent());
        before - pending.len()
    }

    /// Return every record to the unsent state
    pub async fn rollback(&self) {
        let mut pending = self.pending.lock().await;
        let mut restored = 0;
        for message in pending.iter_mut().filter(|m| m.is_sent()) {
            message.set_sent(false);
            restored += 1;
        }
        if restored > 0 {
            warn!("Exchange failed, keeping {} records for the next cycle", restored);
        }
    }

    /// Length and sent flag of every queued record, in order
    pub async fn snapshot(&self) -> Vec<(usize, bool)> {
        self.pending
            .lock()
            .await
            .iter()
            .map(|message| (message.len(), message.is_sent()))
            .collect()
    }

    /// Raw bytes of every queued record, in order
    pub async fn contents(&self) -> Vec<Vec<u8>> {
        self.pending
            .lock()
            .await
            .iter()
            .map(|message| message.as_bytes().to_vec())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_proto::wire::kind;

    fn session() -> SessionId {
        "11111111-1111-1111-1111-111111111111".parse().unwrap()
    }

    fn sized(len: usize, fill: u8) -> Message {
        let mut msg = Message::new();
        msg.add_bytes(&vec![fill; len]).unwrap();
        msg
    }

    #[tokio::test]
    async fn test_empty_flush_is_noop() {
        let queue = OutboundQueue::new(1024);
        assert!(queue.begin_flush(&session()).await.unwrap().is_none());
        assert_eq!(queue.commit().await, 0);
    }

    #[tokio::test]
    async fn test_empty_message_ignored() {
        let queue = OutboundQueue::new(1024);
        queue.enqueue(Message::new()).await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_cap_defers_large_record() {
        let queue = OutboundQueue::new(3_000_000 + 150);
        queue.enqueue(sized(100, 1)).await;
        queue.enqueue(sized(200, 2)).await;
        queue.enqueue(sized(3_000_000, 3)).await;

        let batch = queue.begin_flush(&session()).await.unwrap().unwrap();
        assert_eq!(batch.len(), BATCH_HEADER_LEN + 300);
        assert_eq!(&batch.as_bytes()[..ID_LEN], session().as_bytes());
        assert_eq!(batch.as_bytes()[ID_LEN], kind::POST_RESPONSE);
        assert_eq!(
            queue.snapshot().await,
            vec![(100, true), (200, true), (3_000_000, false)]
        );

        assert_eq!(queue.commit().await, 2);
        assert_eq!(queue.snapshot().await, vec![(3_000_000, false)]);

        let next = queue.begin_flush(&session()).await.unwrap().unwrap();
        assert_eq!(next.len(), BATCH_HEADER_LEN + 3_000_000);
    }

    #[tokio::test]
    async fn test_rollback_restores_queue() {
        let queue = OutboundQueue::new(1024);
        queue.enqueue(sized(10, 1)).await;
        queue.enqueue(sized(20, 2)).await;
        let before = queue.contents().await;

        queue.begin_flush(&session()).await.unwrap().unwrap();
        queue.rollback().await;

        assert_eq!(queue.contents().await, before);
        assert_eq!(queue.snapshot().await, vec![(10, false), (20, false)]);
    }

    #[tokio::test]
    async fn test_enqueue_during_flush_survives_commit() {
        let queue = OutboundQueue::new(1024);
        queue.enqueue(sized(10, 1)).await;
        queue.begin_flush(&session()).await.unwrap().unwrap();
        queue.enqueue(sized(5, 9)).await;

        assert_eq!(queue.commit().await, 1);
        assert_eq!(queue.contents().await, vec![vec![9; 5]]);
    }

    #[tokio::test]
    async fn test_order_preserved_after_cap() {
        let queue = OutboundQueue::new(BATCH_HEADER_LEN + 30);
        queue.enqueue(sized(20, 1)).await;
        queue.enqueue(sized(20, 2)).await;
        queue.enqueue(sized(5, 3)).await;

        queue.begin_flush(&session()).await.unwrap().unwrap();
        // the small third record waits behind the deferred second one
        assert_eq!(queue.snapshot().await, vec![(20, true), (20, false), (5, false)]);
    }

    #[tokio::test]
    async fn test_oversized_record_discarded() {
        let queue = OutboundQueue::new(BATCH_HEADER_LEN + 10);
        queue.enqueue(sized(11, 1)).await;
        queue.enqueue(sized(4, 2)).await;

        let batch = queue.begin_flush(&session()).await.unwrap().unwrap();
        assert_eq!(batch.len(), BATCH_HEADER_LEN + 4);
        assert_eq!(queue.snapshot().await, vec![(4, true)]);
    }

    #[tokio::test]
    async fn test_submit_drops_failed_build() {
        let queue = OutboundQueue::new(1024);
        queue.submit(Err(ProtocolError::AllocationFailure)).await;
        queue.submit(records::progress(&session(), "1 / 2")).await;
        assert_eq!(queue.len().await, 1);
    }
}
