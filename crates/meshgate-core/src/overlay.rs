//! Overlay network contract
//!
//! The overlay client owns encryption, multiplexing, discovery and session
//! keep-alive. Services only need the narrow surface below: build a client,
//! run its background loop, wait for readiness, listen on a port and accept
//! authenticated byte streams.

use crate::cancel::CancellationToken;
use crate::identity::{NodeKeys, PeerIdentity};
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

/// Errors surfaced by overlay clients, listeners and streams
#[derive(Debug, Error)]
pub enum OverlayError {
    /// The listener was closed; no further streams will be accepted
    #[error("listener closed")]
    ListenerClosed,

    /// Another listener already owns the port
    #[error("port {0} is already in use")]
    PortInUse(u16),

    /// The client has no network presence yet
    #[error("overlay client is not ready")]
    NotReady,

    /// The remote peer has no listener on the requested port
    #[error("peer {peer} unreachable on port {port}")]
    PeerUnreachable {
        /// Peer that was dialed
        peer: PeerIdentity,
        /// Port that was dialed
        port: u16,
    },

    /// Discovery endpoint could not be used
    #[error("invalid discovery endpoint: {0}")]
    InvalidDiscovery(String),

    /// Underlying stream failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OverlayError {
    /// Whether this error means the listener is gone for good.
    ///
    /// Accept loops use this to tell shutdown apart from transient failures.
    pub fn is_listener_closed(&self) -> bool {
        matches!(self, OverlayError::ListenerClosed)
    }
}

/// Client of the discovery service used to locate overlay servers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryClient {
    endpoint: String,
}

impl DiscoveryClient {
    /// Create a client for an `http://` or `https://` discovery endpoint
    pub fn new(endpoint: impl Into<String>) -> Result<Self, OverlayError> {
        let endpoint = endpoint.into();
        let trimmed = endpoint.trim_end_matches('/');
        let host = trimmed
            .strip_prefix("http://")
            .or_else(|| trimmed.strip_prefix("https://"))
            .ok_or_else(|| OverlayError::InvalidDiscovery(endpoint.clone()))?;
        if host.is_empty() {
            return Err(OverlayError::InvalidDiscovery(endpoint));
        }
        Ok(Self {
            endpoint: trimmed.to_string(),
        })
    }

    /// Normalized endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Session policy handed to the overlay client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Minimum number of server sessions before the client reports ready
    pub min_sessions: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self { min_sessions: 1 }
    }
}

/// Factory for overlay clients
pub trait OverlayConnector: Send + Sync {
    /// Client type produced by this connector
    type Client: OverlayClient;

    /// Build a client bound to the node identity and session policy
    fn new_client(
        &self,
        keys: NodeKeys,
        discovery: DiscoveryClient,
        config: OverlayConfig,
    ) -> Self::Client;
}

/// A node's presence on the overlay network
#[async_trait]
pub trait OverlayClient: Send + Sync + 'static {
    /// Listener type returned by [`OverlayClient::listen`]
    type Listener: OverlayListener;

    /// Identity this client is registered under
    fn local_identity(&self) -> PeerIdentity;

    /// Start the client's protocol loop in the background.
    ///
    /// The loop runs until `cancel` fires. The returned handle can be aborted
    /// to stop it early.
    fn serve_background(&self, cancel: CancellationToken) -> JoinHandle<()>;

    /// Resolves once the client has a usable network presence
    async fn ready(&self);

    /// Bind a listener to `port`
    async fn listen(&self, port: u16) -> Result<Self::Listener, OverlayError>;
}

/// Listener accepting authenticated streams on one port
#[async_trait]
pub trait OverlayListener: Send + Sync + 'static {
    /// Stream type yielded by [`OverlayListener::accept_stream`]
    type Stream: OverlayStream;

    /// Wait for the next incoming stream.
    ///
    /// Returns [`OverlayError::ListenerClosed`] once the listener is closed.
    async fn accept_stream(&self) -> Result<Self::Stream, OverlayError>;

    /// Close the listener, waking any pending accept
    async fn close(&self) -> Result<(), OverlayError>;
}

/// Bidirectional byte stream with an authenticated remote identity
#[async_trait]
pub trait OverlayStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Identity of the peer at the other end
    fn remote_peer(&self) -> PeerIdentity;

    /// Shut the stream down and release it
    async fn close(mut self) -> Result<(), OverlayError>
    where
        Self: Sized,
    {
        self.shutdown().await?;
        Ok(())
    }
}
