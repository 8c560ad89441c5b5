//! Error types for the transport-setup service
//!
//! Startup failures (`Discovery`, `Connection`, `Listen`, `Config`) are returned to the
//! caller. The remaining variants describe per-connection outcomes; they are
//! logged by the accept loop and never stop the service.

use meshgate_core::{OverlayError, PeerIdentity};
use meshgate_rpc::RegistrationError;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for service operations
pub type Result<T> = std::result::Result<T, SetupError>;

/// Errors that can occur while running the transport-setup service
#[derive(Debug, Error)]
pub enum SetupError {
    /// Discovery endpoint could not be used
    #[error("failed to build discovery client: {0}")]
    Discovery(#[source] OverlayError),

    /// Overlay network did not become ready before cancellation
    #[error("could not join overlay network before cancellation")]
    Connection,

    /// The service port could not be bound
    #[error("failed to listen on port {port}: {source}")]
    Listen {
        /// Port that was requested
        port: u16,
        /// Overlay failure
        #[source]
        source: OverlayError,
    },

    /// A single accept failed; the loop keeps running
    #[error("failed to accept stream: {0}")]
    Accept(#[source] OverlayError),

    /// Connection came from a peer outside the trust list
    #[error("peer {0} is not trusted")]
    UntrustedPeer(PeerIdentity),

    /// Gateway could not be registered with a fresh RPC server
    #[error("failed to register rpc gateway: {0}")]
    Registration(#[from] RegistrationError),

    /// Configuration was missing or invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SetupError {
    /// Whether the error is fatal to the service rather than to one connection
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SetupError::Discovery(_)
                | SetupError::Connection
                | SetupError::Listen { .. }
                | SetupError::Config(_)
        )
    }
}
