//! Service configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! [node]
//! secret_key = "<64 hex chars>"
//!
//! [overlay]
//! discovery = "http://discovery.example:9090"
//! sessions_count = 1
//!
//! [transport_setup]
//! trusted_nodes = ["<64 hex chars>"]
//! ```

use meshgate_core::{
    DiscoveryClient, IdentityError, NodeKeys, OverlayConfig, PeerIdentity, TrustList,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File that was read
        path: PathBuf,
        /// Read failure
        #[source]
        source: std::io::Error,
    },

    /// Config file was not valid TOML for [`SetupConfig`]
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// Node secret key could not be decoded
    #[error("invalid node secret key: {0}")]
    SecretKey(#[source] IdentityError),

    /// A field failed validation
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

fn default_sessions_count() -> usize {
    1
}

/// Complete configuration of a transport-setup node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupConfig {
    /// Node identity
    pub node: NodeSection,
    /// Overlay network settings
    pub overlay: OverlaySection,
    /// Transport-setup listener settings
    #[serde(default)]
    pub transport_setup: TransportSetupSection,
}

/// `[node]` section
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSection {
    /// Hex-encoded ed25519 secret seed
    pub secret_key: String,
}

impl std::fmt::Debug for NodeSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSection")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// `[overlay]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlaySection {
    /// Discovery service endpoint
    pub discovery: String,
    /// Minimum overlay sessions before the node counts as connected
    #[serde(default = "default_sessions_count")]
    pub sessions_count: usize,
}

/// `[transport_setup]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSetupSection {
    /// Peers allowed to call the transport gateway
    #[serde(default)]
    pub trusted_nodes: Vec<PeerIdentity>,
}

impl SetupConfig {
    /// Build a configuration for `keys` with default overlay settings
    pub fn new(keys: &NodeKeys, discovery: impl Into<String>) -> Self {
        Self {
            node: NodeSection {
                secret_key: keys.secret_hex(),
            },
            overlay: OverlaySection {
                discovery: discovery.into(),
                sessions_count: default_sessions_count(),
            },
            transport_setup: TransportSetupSection::default(),
        }
    }

    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: SetupConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check every field without building anything
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.node_keys()?;
        self.discovery_client()?;
        if self.overlay.sessions_count == 0 {
            return Err(ConfigError::Invalid {
                field: "overlay.sessions_count",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Node key pair
    pub fn node_keys(&self) -> Result<NodeKeys, ConfigError> {
        NodeKeys::from_secret_hex(&self.node.secret_key).map_err(ConfigError::SecretKey)
    }

    /// Discovery client for the configured endpoint
    pub fn discovery_client(&self) -> Result<DiscoveryClient, ConfigError> {
        DiscoveryClient::new(self.overlay.discovery.clone()).map_err(|e| ConfigError::Invalid {
            field: "overlay.discovery",
            reason: e.to_string(),
        })
    }

    /// Overlay session policy
    pub fn overlay_config(&self) -> OverlayConfig {
        OverlayConfig {
            min_sessions: self.overlay.sessions_count,
        }
    }

    /// Trust list of the transport-setup listener
    pub fn trust_list(&self) -> TrustList {
        TrustList::new(self.transport_setup.trusted_nodes.iter().copied())
    }
}
