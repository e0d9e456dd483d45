//! Stand-in consensus for a node running the overlay on its own.
//!
//! A ledger sequence that advances on a fixed period, plus bounded stores
//! for the consensus artifacts peers send us so GET_TX_SET,
//! GET_SCP_QUORUMSET and GET_SCP_STATE can be answered.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use peerlink_messages::{DontHave, QuorumSetMsg, ScpEnvelope, TxSetMsg};
use peerlink_network::Consensus;
use peerlink_types::{Hash256, NodeId};

/// SCP state is requested from this many ledgers back.
const SCP_STATE_LOOKBACK: u32 = 2;
const MAX_STORED_ENVELOPES: usize = 1_000;
const MAX_STORED_SETS: usize = 256;

#[derive(Default)]
struct LedgerState {
    tx_sets: HashMap<Hash256, TxSetMsg>,
    quorum_sets: HashMap<Hash256, QuorumSetMsg>,
    envelopes: VecDeque<ScpEnvelope>,
}

pub struct LedgerClock {
    seq: AtomicU32,
    out_of_sync: AtomicBool,
    state: Mutex<LedgerState>,
}

impl LedgerClock {
    pub fn new(start_seq: u32) -> Self {
        Self {
            seq: AtomicU32::new(start_seq),
            out_of_sync: AtomicBool::new(false),
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Close the current ledger and return the new sequence.
    pub fn advance(&self) -> u32 {
        let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        let mut state = self.state.lock();
        let floor = seq.saturating_sub(SCP_STATE_LOOKBACK * 4);
        state.envelopes.retain(|e| e.slot_index >= floor);
        seq
    }

    pub fn set_out_of_sync(&self, value: bool) {
        if self.out_of_sync.swap(value, Ordering::AcqRel) != value {
            tracing::info!(out_of_sync = value, "sync state changed");
        }
    }

    fn store_tx_set(state: &mut LedgerState, set: TxSetMsg) {
        if state.tx_sets.len() >= MAX_STORED_SETS {
            state.tx_sets.clear();
        }
        state.tx_sets.insert(set.hash, set);
    }
}

impl Consensus for LedgerClock {
    fn is_out_of_sync(&self) -> bool {
        self.out_of_sync.load(Ordering::Acquire)
    }

    fn tracking_ledger_seq(&self) -> u32 {
        self.seq.load(Ordering::Acquire)
    }

    fn min_ledger_seq_to_ask_peers(&self) -> u32 {
        self.tracking_ledger_seq().saturating_sub(SCP_STATE_LOOKBACK)
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
            .envelopes
            .iter()
            .filter(|e| e.slot_index >= from_ledger)
            .cloned()
            .collect()
    }

    fn recv_tx_set(&self, from: &NodeId, set: TxSetMsg) {
        tracing::trace!(from = %from.short(), hash = %set.hash, "tx set");
        Self::store_tx_set(&mut self.state.lock(), set);
    }

    fn recv_quorum_set(&self, from: &NodeId, set: QuorumSetMsg) {
        tracing::trace!(from = %from.short(), hash = %set.hash, "quorum set");
        let mut state = self.state.lock();
        if state.quorum_sets.len() >= MAX_STORED_SETS {
            state.quorum_sets.clear();
        }
        state.quorum_sets.insert(set.hash, set);
    }

    fn recv_scp_envelope(&self, from: &NodeId, envelope: ScpEnvelope) {
        tracing::trace!(from = %from.short(), slot = envelope.slot_index, "scp envelope");
        let mut state = self.state.lock();
        if state.envelopes.contains(&envelope) {
            return;
        }
        if state.envelopes.len() >= MAX_STORED_ENVELOPES {
            state.envelopes.pop_front();
        }
        state.envelopes.push_back(envelope);
    }

    fn dont_have(&self, from: &NodeId, msg: &DontHave) {
        tracing::debug!(
            from = %from.short(),
            msg_type = %msg.msg_type,
            hash = %msg.req_hash,
            "peer does not have requested item"
        );
    }
}
