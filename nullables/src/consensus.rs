//! Nullable consensus: canned answers, recorded inputs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use peerlink_messages::{DontHave, QuorumSetMsg, ScpEnvelope, TxSetMsg};
use peerlink_network::Consensus;
use peerlink_types::{Hash256, NodeId};

#[derive(Default)]
struct State {
    tx_sets: HashMap<Hash256, TxSetMsg>,
    quorum_sets: HashMap<Hash256, QuorumSetMsg>,
    scp_state: Vec<ScpEnvelope>,
    received_envelopes: Vec<(NodeId, ScpEnvelope)>,
    received_tx_sets: Vec<(NodeId, Hash256)>,
    received_quorum_sets: Vec<(NodeId, Hash256)>,
    dont_haves: Vec<(NodeId, DontHave)>,
}

#[derive(Default)]
pub struct NullConsensus {
    out_of_sync: AtomicBool,
    tracking_ledger_seq: AtomicU32,
    state: Mutex<State>,
}

impl NullConsensus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_out_of_sync(&self, value: bool) {
        self.out_of_sync.store(value, Ordering::SeqCst);
    }

    pub fn set_tracking_ledger_seq(&self, seq: u32) {
        self.tracking_ledger_seq.store(seq, Ordering::SeqCst);
    }

    pub fn add_tx_set(&self, set: TxSetMsg) {
        self.state.lock().tx_sets.insert(set.hash, set);
    }

    pub fn add_quorum_set(&self, set: QuorumSetMsg) {
        self.state.lock().quorum_sets.insert(set.hash, set);
    }

    pub fn add_scp_envelope(&self, envelope: ScpEnvelope) {
        self.state.lock().scp_state.push(envelope);
    }

    pub fn received_envelopes(&self) -> Vec<(NodeId, ScpEnvelope)> {
        self.state.lock().received_envelopes.clone()
    }

    pub fn received_tx_sets(&self) -> Vec<(NodeId, Hash256)> {
        self.state.lock().received_tx_sets.clone()
    }

    pub fn received_quorum_sets(&self) -> Vec<(NodeId, Hash256)> {
        self.state.lock().received_quorum_sets.clone()
    }

    pub fn dont_haves(&self) -> Vec<(NodeId, DontHave)> {
        self.state.lock().dont_haves.clone()
    }
}

impl Consensus for NullConsensus {
    fn is_out_of_sync(&self) -> bool {
        self.out_of_sync.load(Ordering::SeqCst)
    }

    fn tracking_ledger_seq(&self) -> u32 {
        self.tracking_ledger_seq.load(Ordering::SeqCst)
    }

    fn min_ledger_seq_to_ask_peers(&self) -> u32 {
        self.tracking_ledger_seq().saturating_sub(2)
    }

    fn tx_set(&self, hash: &Hash256) -> Option<TxSetMsg> {
        self.state.lock().tx_sets.get(hash).cloned()
    }

    fn quorum_set(&self, hash: &Hash256) -> Option<QuorumSetMsg> {
        self.state.lock().quorum_sets.get(hash).cloned()
    }

    fn scp_state(&self, from_ledger: u32) -> Vec<ScpEnvelope> {
        self.state
            .lock()
            .scp_state
            .iter()
            .filter(|e| e.slot_index >= from_ledger)
            .cloned()
            .collect()
    }

    fn recv_tx_set(&self, from: &NodeId, set: TxSetMsg) {
        self.state.lock().received_tx_sets.push((*from, set.hash));
    }

    fn recv_quorum_set(&self, from: &NodeId, set: QuorumSetMsg) {
        self.state.lock().received_quorum_sets.push((*from, set.hash));
    }

    fn recv_scp_envelope(&self, from: &NodeId, envelope: ScpEnvelope) {
        self.state.lock().received_envelopes.push((*from, envelope));
    }

    fn dont_have(&self, from: &NodeId, msg: &DontHave) {
        self.state.lock().dont_haves.push((*from, *msg));
    }
}
