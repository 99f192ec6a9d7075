//! Endpoint selection with unbounded retry

use crate::{EndpointList, EndpointStatus, Pacing, RequestKind, RotationStrategy, Transport};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Rotation settings
#[derive(Debug, Clone, Copy)]
pub struct SelectorConfig {
    /// Rotation strategy
    pub strategy: RotationStrategy,
    /// Consecutive failures before an endpoint is declared dead
    pub failover_threshold: u32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::FailOver,
            failover_threshold: 5,
        }
    }
}

/// Delivers payloads over a [`Transport`], rotating endpoints on failure.
///
/// The endpoint list lock is held for the whole exchange, retries
/// included, so at most one exchange is in flight.
pub struct TransportSelector {
    transport: Arc<dyn Transport>,
    endpoints: Mutex<EndpointList>,
    config: SelectorConfig,
}

impl TransportSelector {
    /// Create a selector over a fixed endpoint list
    pub fn new(transport: Arc<dyn Transport>, endpoints: EndpointList, config: SelectorConfig) -> Self {
        Self {
            transport,
            endpoints: Mutex::new(endpoints),
            config,
        }
    }

    /// Exchange `payload` with the controller, retrying until it succeeds.
    ///
    /// Each failure is counted against the current endpoint, may rotate to
    /// another one, and is followed by one `pacing` sleep.
    pub async fn exchange(&self, payload: &[u8], expect_reply: bool, pacing: &Pacing) -> Bytes {
        let kind = RequestKind::for_len(payload.len());
        let mut endpoints = self.endpoints.lock().await;
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            let endpoint = endpoints.current().clone();
            match self.transport.send(&endpoint, kind, payload, expect_reply).await {
                Ok(reply) => {
                    debug!(
                        "Exchange with {} succeeded after {} attempt(s), {} reply bytes",
                        endpoint,
                        attempt,
                        reply.len()
                    );
                    endpoints.record_success();
                    return reply;
                }
                Err(e) => {
                    warn!("Exchange with {} failed (attempt {}): {}", endpoint, attempt, e);
                    endpoints.record_failure(self.config.strategy, self.config.failover_threshold);
                    pacing.sleep().await;
                }
            }
        }
    }

    /// Health of every endpoint
    pub async fn status(&self) -> Vec<EndpointStatus> {
        self.endpoints.lock().await.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Endpoint, TransportError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Fails the scripted number of times, then echoes
    struct Scripted {
        failures: StdMutex<VecDeque<bool>>,
        seen: StdMutex<Vec<(u16, RequestKind)>>,
    }

    impl Scripted {
        fn new(outcomes: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                failures: StdMutex::new(outcomes.iter().copied().collect()),
                seen: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(
            &self,
            endpoint: &Endpoint,
            kind: RequestKind,
            payload: &[u8],
            _expect_reply: bool,
        ) -> Result<Bytes, TransportError> {
            self.seen.lock().unwrap().push((endpoint.port, kind));
            let ok = self.failures.lock().unwrap().pop_front().unwrap_or(true);
            if ok {
                Ok(Bytes::copy_from_slice(payload))
            } else {
                Err(TransportError::Connection("scripted failure".to_string()))
            }
        }
    }

    fn endpoints(n: u16) -> EndpointList {
        EndpointList::new((0..n).map(|i| Endpoint::new("127.0.0.1", 9000 + i, false)).collect()).unwrap()
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let transport = Scripted::new(&[true]);
        let selector = TransportSelector::new(transport.clone(), endpoints(2), SelectorConfig::default());

        let reply = selector.exchange(b"hello", true, &Pacing::immediate()).await;
        assert_eq!(reply.as_ref(), b"hello");
        assert_eq!(transport.seen.lock().unwrap().as_slice(), &[(9000, RequestKind::Light)]);
    }

    #[tokio::test]
    async fn test_retries_and_fails_over() {
        let transport = Scripted::new(&[false, false, false, true]);
        let config = SelectorConfig {
            strategy: RotationStrategy::FailOver,
            failover_threshold: 3,
        };
        let selector = TransportSelector::new(transport.clone(), endpoints(2), config);

        let payload = vec![0u8; 600];
        let reply = selector.exchange(&payload, true, &Pacing::immediate()).await;
        assert_eq!(reply.len(), 600);

        let ports: Vec<u16> = transport.seen.lock().unwrap().iter().map(|(p, _)| *p).collect();
        assert_eq!(ports, vec![9000, 9000, 9000, 9001]);
        assert!(transport.seen.lock().unwrap().iter().all(|(_, k)| *k == RequestKind::Bulk));

        let status = selector.status().await;
        assert!(!status[0].alive);
        assert!(status[1].alive && status[1].current);
    }

    #[tokio::test]
    async fn test_all_dead_wraps_to_head() {
        let transport = Scripted::new(&[false, false, true]);
        let config = SelectorConfig {
            strategy: RotationStrategy::FailOver,
            failover_threshold: 1,
        };
        let selector = TransportSelector::new(transport.clone(), endpoints(2), config);

        selector.exchange(b"x", true, &Pacing::immediate()).await;
        let ports: Vec<u16> = transport.seen.lock().unwrap().iter().map(|(p, _)| *p).collect();
        assert_eq!(ports, vec![9000, 9001, 9000]);

        let status = selector.status().await;
        assert!(status[0].current && status[0].alive);
        assert!(!status[1].alive);
    }
}
