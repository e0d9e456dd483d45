//! Collaborators consumed by the peer state machine.
//!
//! Everything outside the per-connection core (address book, ban list,
//! transaction pool, consensus) is reached through these traits. The node
//! crate supplies real implementations; `peerlink-nullables` supplies
//! deterministic ones for tests.

use std::fmt;
use std::sync::Arc;

use peerlink_messages::{
    DontHave, MessageType, PeerAddress, QuorumSetMsg, ScpEnvelope, TransactionEnvelope, TxSetMsg,
};
use peerlink_types::{Hash256, NodeId, TxHash};
use serde::Serialize;

use crate::auth::PeerAuth;
use crate::config::OverlayConfig;
use crate::flood_budget::SharedFloodBudget;
use crate::metrics::OverlayMetrics;
use crate::scheduler::Scheduler;

/// Process-unique connection handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The overlay's view of all connections.
pub trait PeerRegistry: Send + Sync {
    fn is_shutting_down(&self) -> bool;

    /// Reserve `node_id` for `conn` at HELLO. Returns `false` when another
    /// live connection (pending or authenticated) already holds it.
    fn claim_identity(&self, conn: ConnectionId, node_id: &NodeId) -> bool;

    /// Promote `conn` to the authenticated set. Returns `false` when the
    /// node has no room for it.
    fn accept_authenticated(&self, conn: ConnectionId, node_id: &NodeId) -> bool;

    /// Called exactly once per connection when it drops.
    fn on_dropped(&self, conn: ConnectionId, node_id: Option<&NodeId>);

    /// Addresses to hand out in reply to GET_PEERS.
    fn peers_to_send(&self, exclude: Option<&PeerAddress>, max: usize) -> Vec<PeerAddress>;

    /// Record an address learned from PEERS.
    fn ensure_exists(&self, address: PeerAddress);
}

pub trait BanList: Send + Sync {
    fn is_banned(&self, node_id: &NodeId) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxReceiveOutcome {
    Added,
    Duplicate,
    Rejected,
}

pub trait TxPool: Send + Sync {
    fn get(&self, hash: &TxHash) -> Option<TransactionEnvelope>;
    fn is_banned(&self, hash: &TxHash) -> bool;
    fn receive(&self, from: &NodeId, tx: TransactionEnvelope) -> TxReceiveOutcome;
}

/// Consensus and ledger services.
pub trait Consensus: Send + Sync {
    /// True while the node is catching up and should ignore flood traffic.
    fn is_out_of_sync(&self) -> bool;
    fn tracking_ledger_seq(&self) -> u32;
    /// First ledger to request SCP state from after a peer authenticates.
    fn min_ledger_seq_to_ask_peers(&self) -> u32;
    fn tx_set(&self, hash: &Hash256) -> Option<TxSetMsg>;
    fn quorum_set(&self, hash: &Hash256) -> Option<QuorumSetMsg>;
    fn scp_state(&self, from_ledger: u32) -> Vec<ScpEnvelope>;
    fn recv_tx_set(&self, from: &NodeId, set: TxSetMsg);
    fn recv_quorum_set(&self, from: &NodeId, set: QuorumSetMsg);
    fn recv_scp_envelope(&self, from: &NodeId, envelope: ScpEnvelope);
    fn dont_have(&self, from: &NodeId, msg: &DontHave);
}

/// Which message types are rationed as flood traffic.
pub trait FloodPolicy: Send + Sync {
    fn is_flood_message(&self, msg_type: MessageType) -> bool;
}

pub struct DefaultFloodPolicy;

impl FloodPolicy for DefaultFloodPolicy {
    fn is_flood_message(&self, msg_type: MessageType) -> bool {
        matches!(
            msg_type,
            MessageType::ScpMessage
                | MessageType::Transaction
                | MessageType::FloodAdvert
                | MessageType::FloodDemand
        )
    }
}

/// Shared services handed to every peer.
#[derive(Clone)]
pub struct OverlayContext {
    pub config: Arc<OverlayConfig>,
    pub auth: Arc<PeerAuth>,
    pub registry: Arc<dyn PeerRegistry>,
    pub ban_list: Arc<dyn BanList>,
    pub tx_pool: Arc<dyn TxPool>,
    pub consensus: Arc<dyn Consensus>,
    pub flood_policy: Arc<dyn FloodPolicy>,
    pub scheduler: Scheduler,
    pub metrics: Arc<OverlayMetrics>,
    pub flood_budget: Option<Arc<SharedFloodBudget>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_floods_gossip_only() {
        let policy = DefaultFloodPolicy;
        assert!(policy.is_flood_message(MessageType::Transaction));
        assert!(policy.is_flood_message(MessageType::ScpMessage));
        assert!(policy.is_flood_message(MessageType::FloodAdvert));
        assert!(policy.is_flood_message(MessageType::FloodDemand));
        assert!(!policy.is_flood_message(MessageType::GetPeers));
        assert!(!policy.is_flood_message(MessageType::SendMore));
        assert!(!policy.is_flood_message(MessageType::TxSet));
    }

    #[test]
    fn connection_id_display() {
        assert_eq!(ConnectionId(7).to_string(), "conn-7");
    }
}
