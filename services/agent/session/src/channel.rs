//! Request/response channel to a single hub.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;

/// Transport-level failures of a hub channel
#[derive(Error, Debug)]
pub enum ChannelError {
    /// No trusted CA, so no TLS session can be established
    #[error("no trusted CA certificate")]
    NoTrust,
    /// Hub address cannot be used
    #[error("invalid hub address: {0}")]
    InvalidAddress(String),
    /// TCP connection failed
    #[error("connect: {0}")]
    Connect(#[from] std::io::Error),
    /// TLS handshake failed
    #[error("TLS: {0}")]
    Tls(String),
    /// HTTP/2 handshake or exchange failed
    #[error("HTTP: {0}")]
    Http(#[from] hyper::Error),
}

/// Connection state transitions of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A transport connection to the hub came up
    Connected {
        /// Hub address
        address: String,
    },
    /// A transport connection to the hub went away
    Disconnected {
        /// Hub address
        address: String,
        /// Error that closed the connection, if any
        error: Option<String>,
    },
}

/// Raw bidirectional byte stream of an accepted tunnel
pub trait TunnelStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> TunnelStream for T {}

/// Boxed tunnel stream
pub type Tunnel = Box<dyn TunnelStream>;

/// Multiplexed request/response transport to one hub
///
/// Failures never surface as errors: a call that cannot be completed yields
/// `None`, which callers treat as "absent".
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Address of the hub this channel talks to
    fn address(&self) -> &str;

    /// Send one request and wait for its response
    async fn call(&self, request: Request<Bytes>) -> Option<Response<Bytes>>;

    /// Open a CONNECT-style tunnel at `path`
    async fn open_tunnel(&self, path: &str) -> Option<Tunnel>;

    /// Whether at least one transport connection is up
    fn is_connected(&self) -> bool;

    /// Subscribe to connection state transitions
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// Force-close every transport connection
    fn close_all(&self);
}
