//! Transport abstraction and the TCP reference implementation

use crate::codec::FrameCodec;
use crate::{Endpoint, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Payloads up to this size use the lightweight request form
pub const LIGHT_REQUEST_MAX: usize = 500;

/// Request form hint passed to the carrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Small request (a GET on HTTP carriers)
    Light,
    /// Large request (a POST on HTTP carriers)
    Bulk,
}

impl RequestKind {
    /// Pick the request form for a payload size
    pub fn for_len(len: usize) -> Self {
        if len <= LIGHT_REQUEST_MAX {
            Self::Light
        } else {
            Self::Bulk
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::Light => 0x00,
            Self::Bulk => 0x01,
        }
    }
}

/// One request/reply exchange with a controller endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `payload` to `endpoint` and return the reply bytes.
    ///
    /// When `expect_reply` is false the carrier may return an empty reply.
    async fn send(
        &self,
        endpoint: &Endpoint,
        kind: RequestKind,
        payload: &[u8],
        expect_reply: bool,
    ) -> Result<Bytes, TransportError>;
}

/// Outbound proxy settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProxyConfig {
    /// Proxy URL
    pub url: String,
    /// Proxy user name
    #[serde(default)]
    pub username: Option<String>,
    /// Proxy password
    #[serde(default)]
    pub password: Option<String>,
}

/// Carrier configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Timeout for one request/reply round trip
    pub io_timeout: Duration,
    /// Maximum reply size
    pub max_reply: usize,
    /// Proxy to reach the controller through
    pub proxy: Option<ProxyConfig>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(300),
            max_reply: crate::codec::MAX_FRAME_SIZE,
            proxy: None,
        }
    }
}

/// Plain TCP carrier: one connection per exchange.
///
/// The request frame is a kind tag followed by the payload; the reply is a
/// single frame.
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    /// Create a new TCP transport
    pub fn new(config: TcpConfig) -> Self {
        if let Some(proxy) = &config.proxy {
            warn!("Proxy {} configured; the TCP carrier connects directly", proxy.url);
        }
        Self { config }
    }

    async fn round_trip(
        &self,
        endpoint: &Endpoint,
        kind: RequestKind,
        payload: &[u8],
        expect_reply: bool,
    ) -> Result<Bytes, TransportError> {
        let mut stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::Connection(format!("{}: {}", endpoint, e)))?;

        let mut request = Vec::with_capacity(1 + payload.len());
        request.push(kind.tag());
        request.extend_from_slice(payload);

        let mut codec = FrameCodec::with_max_frame_size(self.config.max_reply.max(request.len()));
        codec.write_frame(&mut stream, &request).await?;

        if !expect_reply {
            return Ok(Bytes::new());
        }

        match codec.read_frame(&mut stream).await? {
            Some(reply) => Ok(reply),
            None => Err(TransportError::ChannelBroken),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(
        &self,
        endpoint: &Endpoint,
        kind: RequestKind,
        payload: &[u8],
        expect_reply: bool,
    ) -> Result<Bytes, TransportError> {
        if endpoint.secure {
            warn!("TLS requested for {} but the TCP carrier sends in the clear", endpoint);
        }
        debug!("Sending {} bytes to {} ({:?})", payload.len(), endpoint, kind);

        timeout(
            self.config.io_timeout,
            self.round_trip(endpoint, kind, payload, expect_reply),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
    }
}
