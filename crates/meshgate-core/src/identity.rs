//! Node and peer identities
//!
//! Peers on the overlay are addressed by their ed25519 public key. The same
//! value is used as the authorization credential checked by the trust list.

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of an encoded public key in bytes
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Errors raised while decoding identities and key material
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Input was not valid hex
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    /// Decoded key had the wrong length
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Expected byte length
        expected: usize,
        /// Actual byte length
        actual: usize,
    },

    /// Bytes do not describe a point on the ed25519 curve
    #[error("not a valid ed25519 public key")]
    InvalidPublicKey,
}

/// Public key identifying a participant of the overlay network
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerIdentity([u8; PUBLIC_KEY_LENGTH]);

impl PeerIdentity {
    /// Wrap raw public key bytes
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Raw public key bytes
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decode as an ed25519 verifying key.
    pub fn verifying_key(&self) -> Result<VerifyingKey, IdentityError> {
        VerifyingKey::from_bytes(&self.0).map_err(|_| IdentityError::InvalidPublicKey)
    }
}

impl From<VerifyingKey> for PeerIdentity {
    fn from(key: VerifyingKey) -> Self {
        Self(key.to_bytes())
    }
}

impl FromStr for PeerIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_key_hex(s)?))
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerIdentity({})", self.to_hex())
    }
}

impl Serialize for PeerIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PeerIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(serde::de::Error::custom)
    }
}

/// The local node's signing key pair
#[derive(Clone)]
pub struct NodeKeys {
    signing_key: SigningKey,
}

impl NodeKeys {
    /// Generate a fresh key pair from the operating system RNG
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Build a key pair from a 32-byte secret seed
    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&secret),
        }
    }

    /// Build a key pair from a hex-encoded secret seed
    pub fn from_secret_hex(secret: &str) -> Result<Self, IdentityError> {
        Ok(Self::from_secret_bytes(decode_key_hex(secret)?))
    }

    /// Public half of the key pair
    pub fn public(&self) -> PeerIdentity {
        PeerIdentity::from(self.signing_key.verifying_key())
    }

    /// Hex-encoded secret seed, for writing generated keys to config files
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

impl fmt::Debug for NodeKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeKeys")
            .field("public", &self.public())
            .finish_non_exhaustive()
    }
}

fn decode_key_hex(s: &str) -> Result<[u8; PUBLIC_KEY_LENGTH], IdentityError> {
    let bytes = hex::decode(s.trim()).map_err(|e| IdentityError::InvalidHex(e.to_string()))?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| IdentityError::InvalidLength {
        expected: PUBLIC_KEY_LENGTH,
        actual,
    })
}
