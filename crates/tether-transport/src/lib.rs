//! # Tether Transport
//!
//! Carries sealed protocol messages to the controller and bytes to peer
//! agents. The [`TransportSelector`] owns the endpoint list, rotates
//! between endpoints on failure and retries without bound; the
//! [`LocalChannel`] trait abstracts the message channels used for links.

#![warn(missing_docs)]

pub mod channel;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod pacing;
pub mod selector;
pub mod transport;

pub use channel::{ChannelConnector, LocalChannel, SocketConfig, SocketConnector, StreamChannel};
pub use codec::FrameCodec;
pub use endpoint::{Endpoint, EndpointList, EndpointStatus, RotationStrategy};
pub use error::TransportError;
pub use pacing::Pacing;
pub use selector::{SelectorConfig, TransportSelector};
pub use transport::{ProxyConfig, RequestKind, TcpConfig, TcpTransport, Transport};
