//! Static allow-list of peers permitted to use a service.

use crate::identity::PeerIdentity;
use serde::{Deserialize, Serialize};

/// Ordered, immutable set of trusted peer identities
///
/// Membership is existential: order and duplicates have no effect on
/// [`TrustList::contains`]. Lists are expected to hold tens of entries, so a
/// linear scan is used rather than a hashed index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrustList {
    peers: Vec<PeerIdentity>,
}

impl TrustList {
    /// Build a trust list from any sequence of identities
    pub fn new(peers: impl IntoIterator<Item = PeerIdentity>) -> Self {
        Self {
            peers: peers.into_iter().collect(),
        }
    }

    /// Whether `peer` is authorized
    pub fn contains(&self, peer: &PeerIdentity) -> bool {
        self.peers.iter().any(|trusted| trusted == peer)
    }

    /// Number of configured entries, duplicates included
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True when no peer is authorized
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Entries in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &PeerIdentity> {
        self.peers.iter()
    }
}

impl FromIterator<PeerIdentity> for TrustList {
    fn from_iter<I: IntoIterator<Item = PeerIdentity>>(iter: I) -> Self {
        Self::new(iter)
    }
}
