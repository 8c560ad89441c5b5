//! Transport Manager contract
//!
//! The manager owns the node's data transports. Its operations are what the
//! gateway exposes to trusted peers; this module defines the narrow contract
//! the gateway needs and an in-memory manager used by the bundled node and
//! tests.

use async_trait::async_trait;
use meshgate_core::PeerIdentity;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Transport types accepted by [`InMemoryTransportManager::new`]
pub const DEFAULT_TRANSPORT_TYPES: &[&str] = &["dmsg", "stcp", "stcpr", "sudph"];

/// Errors reported by a transport manager
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManagerError {
    /// A transport cannot connect the node to itself
    #[error("cannot create a transport to the local node")]
    SelfTransport,

    /// The transport type is not supported
    #[error("unsupported transport type {0:?}")]
    UnsupportedType(String),

    /// Manager-specific failure
    #[error("transport manager error: {0}")]
    Other(String),
}

/// One data transport between the local node and a remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportEntry {
    /// Deterministic id, see [`make_transport_id`]
    pub id: Uuid,
    /// Local edge
    pub local: PeerIdentity,
    /// Remote edge
    pub remote: PeerIdentity,
    /// Transport type, e.g. `dmsg`
    pub transport_type: String,
    /// Whether the transport is currently usable
    pub is_up: bool,
}

/// Operations a transport manager offers to the setup gateway
///
/// Implementations are shared between every concurrently served connection
/// and are responsible for their own synchronization.
#[async_trait]
pub trait TransportManager: Send + Sync + 'static {
    /// Identity of the node owning the transports
    fn local_identity(&self) -> PeerIdentity;

    /// Create or return the transport to `remote` of `transport_type`
    async fn save_transport(
        &self,
        remote: PeerIdentity,
        transport_type: &str,
    ) -> Result<TransportEntry, ManagerError>;

    /// Remove a transport. Unknown ids are ignored.
    async fn delete_transport(&self, id: Uuid) -> Result<(), ManagerError>;

    /// All current transports
    async fn transports(&self) -> Vec<TransportEntry>;
}

/// Deterministic transport id for an unordered pair of edges and a type.
///
/// Both directions of the same pair map to the same id.
pub fn make_transport_id(a: &PeerIdentity, b: &PeerIdentity, transport_type: &str) -> Uuid {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    let mut name = Vec::with_capacity(64 + transport_type.len());
    name.extend_from_slice(low.as_bytes());
    name.extend_from_slice(high.as_bytes());
    name.extend_from_slice(transport_type.as_bytes());
    Uuid::new_v5(&Uuid::nil(), &name)
}

/// Process-local transport manager
#[derive(Debug)]
pub struct InMemoryTransportManager {
    local: PeerIdentity,
    transport_types: Vec<String>,
    entries: RwLock<BTreeMap<Uuid, TransportEntry>>,
}

impl InMemoryTransportManager {
    /// Manager for `local` supporting [`DEFAULT_TRANSPORT_TYPES`]
    pub fn new(local: PeerIdentity) -> Self {
        Self::with_types(local, DEFAULT_TRANSPORT_TYPES.iter().copied())
    }

    /// Manager for `local` supporting exactly `types`
    pub fn with_types<'a>(local: PeerIdentity, types: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            local,
            transport_types: types.into_iter().map(str::to_string).collect(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl TransportManager for InMemoryTransportManager {
    fn local_identity(&self) -> PeerIdentity {
        self.local
    }

    async fn save_transport(
        &self,
        remote: PeerIdentity,
        transport_type: &str,
    ) -> Result<TransportEntry, ManagerError> {
        if remote == self.local {
            return Err(ManagerError::SelfTransport);
        }
        if !self.transport_types.iter().any(|t| t == transport_type) {
            return Err(ManagerError::UnsupportedType(transport_type.to_string()));
        }

        let id = make_transport_id(&self.local, &remote, transport_type);
        let entry = self
            .entries
            .write()
            .entry(id)
            .or_insert_with(|| TransportEntry {
                id,
                local: self.local,
                remote,
                transport_type: transport_type.to_string(),
                is_up: true,
            })
            .clone();
        Ok(entry)
    }

    async fn delete_transport(&self, id: Uuid) -> Result<(), ManagerError> {
        self.entries.write().remove(&id);
        Ok(())
    }

    async fn transports(&self) -> Vec<TransportEntry> {
        self.entries.read().values().cloned().collect()
    }
}
