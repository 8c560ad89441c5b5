//! Trusted-peer transport setup
//!
//! A node joins the overlay network, listens on the transport-setup port
//! and exposes its transport manager over RPC to a fixed set of trusted
//! peers. Connections from anyone else are closed on accept.

pub mod binding;
pub mod config;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod manager;
pub mod service;
pub mod session;
pub mod stats;

pub use binding::{GatewayFactory, RpcBinder};
pub use config::{ConfigError, SetupConfig};
pub use error::{Result, SetupError};
pub use gate::{ConnectionGate, GateDecision};
pub use gateway::{
    BoolResponse, GatewayClient, GatewayError, TransportGateway, TransportRequest,
    TransportResponse, UuidRequest, ADD_TRANSPORT_TIMEOUT, GATEWAY_SERVICE,
};
pub use manager::{
    make_transport_id, InMemoryTransportManager, ManagerError, TransportEntry, TransportManager,
    DEFAULT_TRANSPORT_TYPES,
};
pub use service::{SetupParams, TransportSetupService, TRANSPORT_SETUP_PORT};
pub use session::{OverlaySession, SessionState};
pub use stats::{ServiceStats, StatsSnapshot};
