//! Overlay tuning knobs.
//!
//! Every field has a serde default so an empty `[overlay]` table (or none at
//! all) yields a working configuration.

use std::time::Duration;

use peerlink_messages::TX_ADVERT_VECTOR_MAX_SIZE;
use peerlink_protocol::codec::transaction_message_size;
use peerlink_protocol::{OVERLAY_PROTOCOL_MIN_VERSION, OVERLAY_PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};

use crate::NetworkError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Messages a peer may have outstanding with us (message-count mode).
    #[serde(default = "default_peer_reading_capacity")]
    pub peer_reading_capacity: u64,

    /// Flood messages a peer may have outstanding with us (message-count mode).
    #[serde(default = "default_peer_flood_reading_capacity")]
    pub peer_flood_reading_capacity: u64,

    /// Released flood messages that trigger a SEND_MORE.
    #[serde(default = "default_send_more_batch_size")]
    pub flow_control_send_more_batch_size: u64,

    /// Flood bytes a peer may have outstanding with us (byte mode).
    #[serde(default = "default_peer_flood_reading_capacity_bytes")]
    pub peer_flood_reading_capacity_bytes: u64,

    /// Released flood bytes that trigger a SEND_MORE_EXTENDED.
    #[serde(default = "default_send_more_batch_size_bytes")]
    pub flow_control_send_more_batch_size_bytes: u64,

    /// Whether to request byte-denominated flow control in AUTH.
    #[serde(default = "default_true")]
    pub enable_flow_control_bytes: bool,

    /// Node-wide byte budget backing the grants of byte-mode peers.
    #[serde(default)]
    pub aggregate_flood_bytes_budget: Option<u64>,

    /// Largest transaction payload accepted, relayed or demanded.
    #[serde(default = "default_max_tx_size_bytes")]
    pub max_tx_size_bytes: u64,

    /// Idle timeout once authenticated.
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,

    /// Idle timeout while the handshake is in progress.
    #[serde(default = "default_peer_authentication_timeout_secs")]
    pub peer_authentication_timeout_secs: u64,

    /// Maximum age of the oldest unwritten outbound frame.
    #[serde(default = "default_peer_straggler_timeout_secs")]
    pub peer_straggler_timeout_secs: u64,

    /// How long flood sending may stay blocked on missing outbound capacity.
    #[serde(default = "default_no_flood_capacity_timeout_secs")]
    pub no_flood_capacity_timeout_secs: u64,

    /// Period of the liveness timer (ping, idle and straggler checks).
    #[serde(default = "default_recurrent_timer_period_ms")]
    pub recurrent_timer_period_ms: u64,

    /// Advert flush period.
    #[serde(default = "default_flood_advert_period_ms")]
    pub flood_advert_period_ms: u64,

    /// Queued hashes beyond which an advert is flushed immediately.
    #[serde(default = "default_flood_advert_batch_size")]
    pub flood_advert_batch_size: usize,

    /// Hard cap on hashes waiting to be advertised.
    #[serde(default = "default_tx_advert_queue_max_size")]
    pub tx_advert_queue_max_size: usize,

    /// Capacity of the per-peer advert history.
    #[serde(default = "default_advert_history_capacity")]
    pub advert_history_capacity: usize,

    /// Cap on advertised hashes waiting for demand evaluation.
    #[serde(default = "default_incoming_advert_queue_max_size")]
    pub incoming_advert_queue_max_size: usize,

    /// Outbound flood queue caps; the consensus queue is never trimmed.
    #[serde(default = "default_outbound_tx_queue_limit")]
    pub outbound_tx_queue_limit: usize,
    #[serde(default = "default_outbound_demand_queue_limit")]
    pub outbound_demand_queue_limit: usize,
    #[serde(default = "default_outbound_advert_queue_limit")]
    pub outbound_advert_queue_limit: usize,

    /// Droppable tasks older than this are discarded by the scheduler.
    #[serde(default = "default_scheduler_latency_window_ms")]
    pub scheduler_latency_window_ms: u64,

    /// Age of the oldest pending write at which a send queue counts as overloaded.
    #[serde(default = "default_send_queue_overload_ms")]
    pub send_queue_overload_ms: u64,

    #[serde(default = "default_overlay_version")]
    pub overlay_version: u32,
    #[serde(default = "default_overlay_min_version")]
    pub overlay_min_version: u32,
    #[serde(default = "default_version_string")]
    pub version_string: String,

    /// Port announced in HELLO.
    #[serde(default = "default_peer_port")]
    pub peer_port: u16,

    /// Accept loopback and private addresses in PEERS (local test networks).
    #[serde(default)]
    pub allow_localhost_for_testing: bool,

    /// Addresses returned for GET_PEERS.
    #[serde(default = "default_max_peers_to_send")]
    pub max_peers_to_send: usize,

    /// Lifetime of the authentication certificate.
    #[serde(default = "default_auth_cert_lifetime_secs")]
    pub auth_cert_lifetime_secs: u64,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_peer_reading_capacity() -> u64 {
    201
}

fn default_peer_flood_reading_capacity() -> u64 {
    200
}

fn default_send_more_batch_size() -> u64 {
    40
}

fn default_max_tx_size_bytes() -> u64 {
    100 * 1024
}

fn default_peer_flood_reading_capacity_bytes() -> u64 {
    300_000
}

fn default_send_more_batch_size_bytes() -> u64 {
    100_000
}

fn default_true() -> bool {
    true
}

fn default_peer_timeout_secs() -> u64 {
    30
}

fn default_peer_authentication_timeout_secs() -> u64 {
    2
}

fn default_peer_straggler_timeout_secs() -> u64 {
    120
}

fn default_no_flood_capacity_timeout_secs() -> u64 {
    60
}

fn default_recurrent_timer_period_ms() -> u64 {
    5_000
}

fn default_flood_advert_period_ms() -> u64 {
    100
}

fn default_flood_advert_batch_size() -> usize {
    100
}

fn default_tx_advert_queue_max_size() -> usize {
    1_000
}

fn default_advert_history_capacity() -> usize {
    50_000
}

fn default_incoming_advert_queue_max_size() -> usize {
    1_000
}

fn default_outbound_tx_queue_limit() -> usize {
    1_000
}

fn default_outbound_demand_queue_limit() -> usize {
    100
}

fn default_outbound_advert_queue_limit() -> usize {
    100
}

fn default_scheduler_latency_window_ms() -> u64 {
    5_000
}

fn default_send_queue_overload_ms() -> u64 {
    1_000
}

fn default_overlay_version() -> u32 {
    OVERLAY_PROTOCOL_VERSION
}

fn default_overlay_min_version() -> u32 {
    OVERLAY_PROTOCOL_MIN_VERSION
}

fn default_version_string() -> String {
    format!("peerlink {}", env!("CARGO_PKG_VERSION"))
}

fn default_peer_port() -> u16 {
    11625
}

fn default_max_peers_to_send() -> usize {
    50
}

fn default_auth_cert_lifetime_secs() -> u64 {
    3_600
}

// ── Impl ───────────────────────────────────────────────────────────────

impl OverlayConfig {
    /// Reject combinations the flow-control engine cannot honour.
    pub fn validate(&self) -> Result<(), NetworkError> {
        if self.peer_flood_reading_capacity == 0 || self.peer_flood_reading_capacity_bytes == 0 {
            return Err(NetworkError::Config(
                "flood reading capacity must be positive".into(),
            ));
        }
        if self.peer_reading_capacity <= self.peer_flood_reading_capacity {
            return Err(NetworkError::Config(format!(
                "peer_reading_capacity ({}) must exceed peer_flood_reading_capacity ({})",
                self.peer_reading_capacity, self.peer_flood_reading_capacity
            )));
        }
        if self.flow_control_send_more_batch_size == 0
            || self.flow_control_send_more_batch_size > self.peer_flood_reading_capacity
        {
            return Err(NetworkError::Config(
                "flow_control_send_more_batch_size must be in 1..=peer_flood_reading_capacity"
                    .into(),
            ));
        }
        if self.flow_control_send_more_batch_size_bytes == 0
            || self.flow_control_send_more_batch_size_bytes
                > self.peer_flood_reading_capacity_bytes
        {
            return Err(NetworkError::Config(
                "flow_control_send_more_batch_size_bytes must be in 1..=peer_flood_reading_capacity_bytes"
                    .into(),
            ));
        }
        // a transaction no byte grant can cover would wedge the flood queues
        if self.peer_flood_reading_capacity_bytes < self.max_tx_message_size() {
            return Err(NetworkError::Config(format!(
                "peer_flood_reading_capacity_bytes ({}) is below the largest transaction message ({} bytes)",
                self.peer_flood_reading_capacity_bytes,
                self.max_tx_message_size()
            )));
        }
        if let Some(budget) = self.aggregate_flood_bytes_budget {
            if budget < self.max_tx_message_size() {
                return Err(NetworkError::Config(format!(
                    "aggregate_flood_bytes_budget ({budget}) is below the largest transaction message"
                )));
            }
        }
        if self.overlay_min_version > self.overlay_version {
            return Err(NetworkError::Config(
                "overlay_min_version exceeds overlay_version".into(),
            ));
        }
        if self.flood_advert_batch_size == 0
            || self.flood_advert_batch_size > TX_ADVERT_VECTOR_MAX_SIZE
        {
            return Err(NetworkError::Config(format!(
                "flood_advert_batch_size must be in 1..={TX_ADVERT_VECTOR_MAX_SIZE}"
            )));
        }
        Ok(())
    }

    /// Encoded size of a TRANSACTION carrying the largest accepted payload.
    pub fn max_tx_message_size(&self) -> u64 {
        transaction_message_size(self.max_tx_size_bytes)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn authentication_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_authentication_timeout_secs)
    }

    pub fn straggler_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_straggler_timeout_secs)
    }

    pub fn no_flood_capacity_timeout(&self) -> Duration {
        Duration::from_secs(self.no_flood_capacity_timeout_secs)
    }

    pub fn recurrent_timer_period(&self) -> Duration {
        Duration::from_millis(self.recurrent_timer_period_ms)
    }

    pub fn flood_advert_period(&self) -> Duration {
        Duration::from_millis(self.flood_advert_period_ms)
    }

    pub fn scheduler_latency_window(&self) -> Duration {
        Duration::from_millis(self.scheduler_latency_window_ms)
    }

    pub fn send_queue_overload(&self) -> Duration {
        Duration::from_millis(self.send_queue_overload_ms)
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            peer_reading_capacity: default_peer_reading_capacity(),
            peer_flood_reading_capacity: default_peer_flood_reading_capacity(),
            flow_control_send_more_batch_size: default_send_more_batch_size(),
            peer_flood_reading_capacity_bytes: default_peer_flood_reading_capacity_bytes(),
            flow_control_send_more_batch_size_bytes: default_send_more_batch_size_bytes(),
            enable_flow_control_bytes: default_true(),
            aggregate_flood_bytes_budget: None,
            max_tx_size_bytes: default_max_tx_size_bytes(),
            peer_timeout_secs: default_peer_timeout_secs(),
            peer_authentication_timeout_secs: default_peer_authentication_timeout_secs(),
            peer_straggler_timeout_secs: default_peer_straggler_timeout_secs(),
            no_flood_capacity_timeout_secs: default_no_flood_capacity_timeout_secs(),
            recurrent_timer_period_ms: default_recurrent_timer_period_ms(),
            flood_advert_period_ms: default_flood_advert_period_ms(),
            flood_advert_batch_size: default_flood_advert_batch_size(),
            tx_advert_queue_max_size: default_tx_advert_queue_max_size(),
            advert_history_capacity: default_advert_history_capacity(),
            incoming_advert_queue_max_size: default_incoming_advert_queue_max_size(),
            outbound_tx_queue_limit: default_outbound_tx_queue_limit(),
            outbound_demand_queue_limit: default_outbound_demand_queue_limit(),
            outbound_advert_queue_limit: default_outbound_advert_queue_limit(),
            scheduler_latency_window_ms: default_scheduler_latency_window_ms(),
            send_queue_overload_ms: default_send_queue_overload_ms(),
            overlay_version: default_overlay_version(),
            overlay_min_version: default_overlay_min_version(),
            version_string: default_version_string(),
            peer_port: default_peer_port(),
            allow_localhost_for_testing: false,
            max_peers_to_send: default_max_peers_to_send(),
            auth_cert_lifetime_secs: default_auth_cert_lifetime_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        OverlayConfig::default().validate().unwrap();
    }

    #[test]
    fn total_must_exceed_flood() {
        let config = OverlayConfig {
            peer_reading_capacity: 200,
            ..OverlayConfig::default()
        };
        assert!(matches!(config.validate(), Err(NetworkError::Config(_))));
    }

    #[test]
    fn batch_larger_than_capacity_rejected() {
        let config = OverlayConfig {
            flow_control_send_more_batch_size_bytes: 400_000,
            ..OverlayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn flood_byte_capacity_must_fit_largest_transaction() {
        let config = OverlayConfig {
            max_tx_size_bytes: 300_000,
            ..OverlayConfig::default()
        };
        assert!(config.max_tx_message_size() > config.peer_flood_reading_capacity_bytes);
        assert!(matches!(config.validate(), Err(NetworkError::Config(_))));

        let config = OverlayConfig {
            aggregate_flood_bytes_budget: Some(1_000),
            ..OverlayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn advert_batch_bounded_by_wire_limit() {
        let config = OverlayConfig {
            flood_advert_batch_size: peerlink_messages::TX_ADVERT_VECTOR_MAX_SIZE + 1,
            ..OverlayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_version_range_rejected() {
        let config = OverlayConfig {
            overlay_min_version: 5,
            overlay_version: 3,
            ..OverlayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn durations_follow_fields() {
        let config = OverlayConfig::default();
        assert_eq!(config.peer_timeout(), Duration::from_secs(30));
        assert_eq!(config.flood_advert_period(), Duration::from_millis(100));
    }
}
