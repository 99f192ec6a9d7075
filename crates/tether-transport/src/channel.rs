//! Local channels to peer agents
//!
//! A channel carries whole messages. Stream carriers (Unix sockets, TCP)
//! are framed with [`FrameCodec`]; writes larger than
//! [`MAX_WRITE_CHUNK`](crate::codec::MAX_WRITE_CHUNK) are split across
//! several calls.

use crate::codec::FrameCodec;
use crate::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Message channel to one peer agent
#[async_trait]
pub trait LocalChannel: Send + Sync {
    /// Return a message if one is already available, without waiting
    async fn try_recv(&mut self) -> Result<Option<Bytes>, TransportError>;

    /// Wait for the next message
    async fn recv(&mut self) -> Result<Bytes, TransportError>;

    /// Write one message in full
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;
}

/// Opens channels by target host and channel name
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Connect to `name` on `target`
    async fn connect(&self, target: &str, name: &str) -> Result<Box<dyn LocalChannel>, TransportError>;
}

/// [`LocalChannel`] over any byte stream
pub struct StreamChannel<S> {
    stream: S,
    codec: FrameCodec,
}

impl<S> StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    /// Wrap a connected stream
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            codec: FrameCodec::new(),
        }
    }
}

#[async_trait]
impl<S> LocalChannel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    async fn try_recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        self.codec.poll_frame(&mut self.stream).await
    }

    async fn recv(&mut self) -> Result<Bytes, TransportError> {
        self.codec
            .read_frame(&mut self.stream)
            .await?
            .ok_or(TransportError::ChannelBroken)
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.codec.write_frame(&mut self.stream, payload).await
    }
}

/// Connector configuration
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Directory holding named local sockets
    pub socket_dir: PathBuf,
    /// Wait before the single retry when the peer is busy
    pub busy_wait: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            socket_dir: std::env::temp_dir(),
            busy_wait: Duration::from_millis(6500),
        }
    }
}

/// Connects to named Unix sockets, or to TCP when the name is a port
pub struct SocketConnector {
    config: SocketConfig,
}

impl SocketConnector {
    /// Create a new connector
    pub fn new(config: SocketConfig) -> Self {
        Self { config }
    }

    fn is_busy(error: &io::Error) -> bool {
        matches!(
            error.kind(),
            io::ErrorKind::ConnectionRefused | io::ErrorKind::WouldBlock
        )
    }

    async fn open(&self, target: &str, name: &str) -> io::Result<Box<dyn LocalChannel>> {
        if let Ok(port) = name.parse::<u16>() {
            let stream = TcpStream::connect((target, port)).await?;
            return Ok(Box::new(StreamChannel::new(stream)));
        }
        self.open_local(target, name).await
    }

    #[cfg(unix)]
    async fn open_local(&self, target: &str, name: &str) -> io::Result<Box<dyn LocalChannel>> {
        if !is_local(target) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("named channel {} is only reachable on this host, not {}", name, target),
            ));
        }
        let path = self.config.socket_dir.join(name);
        let stream = tokio::net::UnixStream::connect(&path).await?;
        Ok(Box::new(StreamChannel::new(stream)))
    }

    #[cfg(not(unix))]
    async fn open_local(&self, _target: &str, name: &str) -> io::Result<Box<dyn LocalChannel>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("named channel {} needs Unix sockets", name),
        ))
    }
}

fn is_local(target: &str) -> bool {
    matches!(target, "" | "." | "localhost" | "127.0.0.1" | "::1")
}

#[async_trait]
impl ChannelConnector for SocketConnector {
    async fn connect(&self, target: &str, name: &str) -> Result<Box<dyn LocalChannel>, TransportError> {
        debug!("Connecting to channel {} on {}", name, target);
        match self.open(target, name).await {
            Ok(channel) => Ok(channel),
            Err(e) if Self::is_busy(&e) => {
                info!("Channel {} busy, retrying in {:?}", name, self.config.busy_wait);
                tokio::time::sleep(self.config.busy_wait).await;
                self.open(target, name)
                    .await
                    .map_err(|e| TransportError::Connection(format!("{}: {}", name, e)))
            }
            Err(e) => Err(TransportError::Connection(format!("{}: {}", name, e))),
        }
    }
}
