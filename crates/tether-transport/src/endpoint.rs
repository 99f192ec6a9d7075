//! Controller endpoints and rotation between them

use crate::TransportError;
use rand::Rng;
use serde::Deserialize;
use std::fmt;
use tracing::{debug, info, warn};

/// One reachable controller address
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Endpoint {
    /// Host name or address
    pub host: String,
    /// Port
    pub port: u16,
    /// Whether the carrier should use transport security
    #[serde(default)]
    pub secure: bool,
    /// Consecutive failures while this endpoint was current
    #[serde(skip)]
    failures: u32,
    /// Marked unusable by rotation
    #[serde(skip)]
    dead: bool,
}

impl Endpoint {
    /// Create a live endpoint
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
            failures: 0,
            dead: false,
        }
    }

    /// Whether rotation has given up on this endpoint
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Consecutive failures recorded against this endpoint
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// How to pick the next endpoint after a failed exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationStrategy {
    /// Stay on the current endpoint until it fails `threshold` times in a row
    #[default]
    FailOver,
    /// Move to the next endpoint after every failure
    RoundRobin,
    /// Jump to a random live endpoint after every failure
    Random,
}

/// Health snapshot of one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStatus {
    /// `host:port`
    pub address: String,
    /// Not marked dead
    pub alive: bool,
    /// Currently selected
    pub current: bool,
}

/// Ordered endpoint list with a current pointer. Index 0 is the head.
#[derive(Debug, Clone)]
pub struct EndpointList {
    endpoints: Vec<Endpoint>,
    current: usize,
}

impl EndpointList {
    /// Build the list; at least one endpoint is required
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, TransportError> {
        if endpoints.is_empty() {
            return Err(TransportError::Configuration("no endpoints configured".to_string()));
        }
        Ok(Self { endpoints, current: 0 })
    }

    /// Currently selected endpoint
    pub fn current(&self) -> &Endpoint {
        &self.endpoints[self.current]
    }

    /// Index of the current endpoint
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Number of endpoints
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always false; the list is never empty
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Endpoints in configured order
    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    /// Health of every endpoint in configured order
    pub fn status(&self) -> Vec<EndpointStatus> {
        self.endpoints
            .iter()
            .enumerate()
            .map(|(i, e)| EndpointStatus {
                address: e.to_string(),
                alive: !e.dead,
                current: i == self.current,
            })
            .collect()
    }

    /// A successful exchange clears the current endpoint's failure state
    pub fn record_success(&mut self) {
        let endpoint = &mut self.endpoints[self.current];
        if endpoint.dead {
            info!("Endpoint {} is reachable again", endpoint);
        }
        endpoint.failures = 0;
        endpoint.dead = false;
    }

    /// Count a failed exchange and rotate according to `strategy`.
    ///
    /// Returns true when the current pointer moved.
    pub fn record_failure(&mut self, strategy: RotationStrategy, threshold: u32) -> bool {
        let endpoint = &mut self.endpoints[self.current];
        endpoint.failures = endpoint.failures.saturating_add(1);
        let exhausted = endpoint.failures >= threshold.max(1);
        debug!("Endpoint {} failed {} times in a row", endpoint, endpoint.failures);

        if exhausted {
            warn!("Marking endpoint {} dead", endpoint);
            endpoint.dead = true;
        }

        let next = match strategy {
            RotationStrategy::FailOver if !exhausted => return false,
            RotationStrategy::FailOver | RotationStrategy::RoundRobin => self.next_live(),
            RotationStrategy::Random => self.random_live(),
        };
        self.move_to(next)
    }

    fn next_live(&self) -> usize {
        let len = self.endpoints.len();
        (1..len)
            .map(|step| (self.current + step) % len)
            .find(|&i| !self.endpoints[i].dead)
            .unwrap_or(0)
    }

    fn random_live(&self) -> usize {
        let live: Vec<usize> = (0..self.endpoints.len())
            .filter(|&i| !self.endpoints[i].dead)
            .collect();
        if live.is_empty() {
            return 0;
        }
        live[rand::thread_rng().gen_range(0..live.len())]
    }

    fn move_to(&mut self, next: usize) -> bool {
        if next == self.current {
            return false;
        }
        self.current = next;
        self.endpoints[next].failures = 0;
        info!("Rotated to endpoint {}", self.endpoints[next]);
        true
    }
}
