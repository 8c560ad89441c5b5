//! Core types for meshgate services
//!
//! Provides peer identities, the static trust list used to authorize
//! incoming connections, cooperative cancellation, and the overlay network
//! contract together with a process-local implementation of it.

pub mod cancel;
pub mod identity;
pub mod memory;
pub mod overlay;
pub mod trust;

// Re-export essential components
pub use cancel::CancellationToken;
pub use identity::{IdentityError, NodeKeys, PeerIdentity, PUBLIC_KEY_LENGTH};
pub use memory::{MemoryClient, MemoryListener, MemoryOverlay, MemoryStream};
pub use overlay::{
    DiscoveryClient, OverlayClient, OverlayConfig, OverlayConnector, OverlayError,
    OverlayListener, OverlayStream,
};
pub use trust::TrustList;
