//! Nullable transaction pool.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use peerlink_crypto::hash_transaction;
use peerlink_messages::TransactionEnvelope;
use peerlink_network::{TxPool, TxReceiveOutcome};
use peerlink_types::{NodeId, TxHash};

#[derive(Default)]
pub struct NullTxPool {
    txs: Mutex<HashMap<TxHash, TransactionEnvelope>>,
    banned: Mutex<HashSet<TxHash>>,
    received: Mutex<Vec<(NodeId, TxHash)>>,
}

impl NullTxPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction and return its hash.
    pub fn add(&self, tx: TransactionEnvelope) -> TxHash {
        let hash = hash_transaction(&tx.payload);
        self.txs.lock().insert(hash, tx);
        hash
    }

    pub fn ban(&self, hash: TxHash) {
        self.banned.lock().insert(hash);
    }

    /// Transactions handed to [`TxPool::receive`], in order.
    pub fn received(&self) -> Vec<(NodeId, TxHash)> {
        self.received.lock().clone()
    }
}

impl TxPool for NullTxPool {
    fn get(&self, hash: &TxHash) -> Option<TransactionEnvelope> {
        self.txs.lock().get(hash).cloned()
    }

    fn is_banned(&self, hash: &TxHash) -> bool {
        self.banned.lock().contains(hash)
    }

    fn receive(&self, from: &NodeId, tx: TransactionEnvelope) -> TxReceiveOutcome {
        let hash = hash_transaction(&tx.payload);
        self.received.lock().push((*from, hash));
        if self.is_banned(&hash) {
            return TxReceiveOutcome::Rejected;
        }
        match self.txs.lock().insert(hash, tx) {
            Some(_) => TxReceiveOutcome::Duplicate,
            None => TxReceiveOutcome::Added,
        }
    }
}
