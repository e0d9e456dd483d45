//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};

use peerlink_crypto::{keypair_from_seed, network_id_from_passphrase};
use peerlink_network::OverlayConfig;
use peerlink_types::{KeyPair, NetworkId};

use crate::NodeError;

/// Configuration for a peerlink node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Overlay tuning lives in the
/// `[overlay]` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Passphrase hashed into the network id; peers on other networks are
    /// refused at HELLO.
    #[serde(default = "default_network_passphrase")]
    pub network_passphrase: String,

    /// Address the listener binds to. The port comes from `overlay.peer_port`.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Hex-encoded 32-byte seed for the node identity. A fresh identity is
    /// generated at startup when absent.
    #[serde(default)]
    pub node_seed: Option<String>,

    /// Peers ("ip:port") dialled at startup and whenever outbound slots are free.
    #[serde(default)]
    pub known_peers: Vec<String>,

    /// Maximum concurrently accepted (inbound) connections.
    #[serde(default = "default_max_inbound")]
    pub max_inbound_connections: usize,

    /// Number of outbound connections the dialer tries to keep open.
    #[serde(default = "default_target_outbound")]
    pub target_outbound_connections: usize,

    /// Maximum authenticated peers across both directions.
    #[serde(default = "default_max_authenticated")]
    pub max_authenticated_peers: usize,

    /// Transactions kept in the in-memory pool.
    #[serde(default = "default_tx_pool_capacity")]
    pub tx_pool_capacity: usize,

    /// Period of the demand pass over incoming adverts.
    #[serde(default = "default_demand_period_ms")]
    pub demand_period_ms: u64,

    /// Hashes demanded from one peer per pass.
    #[serde(default = "default_max_demand_batch")]
    pub max_demand_batch: usize,

    /// Period of the stand-in ledger clock used when no consensus is attached.
    #[serde(default = "default_ledger_close_secs")]
    pub ledger_close_secs: u64,

    /// Ledgers of advert history kept per peer.
    #[serde(default = "default_advert_history_ledgers")]
    pub advert_history_ledgers: u32,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log a metrics snapshot periodically.
    #[serde(default)]
    pub enable_metrics: bool,

    #[serde(default)]
    pub overlay: OverlayConfig,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_network_passphrase() -> String {
    "peerlink development network".to_string()
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_max_inbound() -> usize {
    64
}

fn default_target_outbound() -> usize {
    8
}

fn default_max_authenticated() -> usize {
    72
}

fn default_tx_pool_capacity() -> usize {
    100_000
}

fn default_demand_period_ms() -> u64 {
    200
}

fn default_max_demand_batch() -> usize {
    100
}

fn default_ledger_close_secs() -> u64 {
    5
}

fn default_advert_history_ledgers() -> u32 {
    12
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("NodeConfig is always serializable to TOML")
    }

    /// Check node-level limits, then the overlay's own constraints.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.max_authenticated_peers == 0 {
            return Err(NodeError::Config(
                "max_authenticated_peers must be positive".into(),
            ));
        }
        if self.demand_period_ms == 0 || self.ledger_close_secs == 0 {
            return Err(NodeError::Config("tick periods must be positive".into()));
        }
        self.node_keypair()?;
        self.overlay.validate()?;
        Ok(())
    }

    pub fn network_id(&self) -> NetworkId {
        network_id_from_passphrase(&self.network_passphrase)
    }

    /// The node identity: from `node_seed` when set, otherwise random.
    pub fn node_keypair(&self) -> Result<KeyPair, NodeError> {
        match &self.node_seed {
            Some(seed_hex) => {
                let bytes = hex::decode(seed_hex.trim())
                    .map_err(|e| NodeError::Config(format!("node_seed: {e}")))?;
                let seed: [u8; 32] = bytes.try_into().map_err(|_| {
                    NodeError::Config("node_seed must be 32 bytes of hex".into())
                })?;
                Ok(keypair_from_seed(&seed))
            }
            None => Ok(keypair_from_seed(&rand::random())),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network_passphrase: default_network_passphrase(),
            listen_address: default_listen_address(),
            node_seed: None,
            known_peers: Vec::new(),
            max_inbound_connections: default_max_inbound(),
            target_outbound_connections: default_target_outbound(),
            max_authenticated_peers: default_max_authenticated(),
            tx_pool_capacity: default_tx_pool_capacity(),
            demand_period_ms: default_demand_period_ms(),
            max_demand_batch: default_max_demand_batch(),
            ledger_close_secs: default_ledger_close_secs(),
            advert_history_ledgers: default_advert_history_ledgers(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            enable_metrics: false,
            overlay: OverlayConfig::default(),
        }
    }
}
