//! RPC error types

use thiserror::Error;

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors raised while framing, dispatching or calling
#[derive(Debug, Error)]
pub enum RpcError {
    /// Underlying stream failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame body exceeds the configured limit
    #[error("frame too large: {len} > {max}")]
    FrameTooLarge {
        /// Announced frame length
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Frame body was not valid JSON for the expected message
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Peer closed the stream before a response arrived
    #[error("connection closed")]
    ConnectionClosed,

    /// No handler registered for the method
    #[error("rpc: can't find method {0}")]
    UnknownMethod(String),

    /// Parameters did not match the handler's request type
    #[error("invalid params for {method}: {reason}")]
    InvalidParams {
        /// Method that was called
        method: String,
        /// Decoder message
        reason: String,
    },

    /// Handler ran and returned an error
    #[error("remote error: {0}")]
    Remote(String),

    /// Response id did not match the outstanding call
    #[error("unexpected response id: expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// Id of the outstanding request
        expected: u64,
        /// Id carried by the response
        actual: u64,
    },
}

/// Errors raised while registering a service with an [`crate::RpcServer`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// Service name was empty or contained a `.`
    #[error("invalid service name {0:?}")]
    InvalidServiceName(String),

    /// Service exported no methods
    #[error("service {0} has no exported methods")]
    NoMethods(String),

    /// A service with this name is already registered
    #[error("service already defined: {0}")]
    DuplicateService(String),
}
