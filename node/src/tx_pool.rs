//! Bounded in-memory transaction pool.
//!
//! Holds what the overlay needs to answer FLOOD_DEMAND and to decide which
//! adverts are worth demanding. Newly accepted transactions are announced
//! on a channel so the node can advertise them to other peers without
//! re-entering a peer lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use peerlink_crypto::hash_transaction;
use peerlink_messages::TransactionEnvelope;
use peerlink_network::{TxPool, TxReceiveOutcome};
use peerlink_types::{NodeId, TxHash};
use tokio::sync::mpsc;

#[derive(Default)]
struct PoolState {
    txs: HashMap<TxHash, TransactionEnvelope>,
    /// Insertion order; the oldest transaction is evicted first.
    order: VecDeque<TxHash>,
    banned: HashSet<TxHash>,
}

pub struct MemoryTxPool {
    capacity: usize,
    /// Largest accepted payload, in bytes.
    max_tx_size: AtomicU64,
    state: Mutex<PoolState>,
    accepted: mpsc::UnboundedSender<TxHash>,
}

impl MemoryTxPool {
    /// A pool holding at most `capacity` transactions of at most
    /// `max_tx_size` payload bytes, plus the receiver of hashes accepted
    /// from peers.
    pub fn new(capacity: usize, max_tx_size: u64) -> (Self, mpsc::UnboundedReceiver<TxHash>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let pool = Self {
            capacity: capacity.max(1),
            max_tx_size: AtomicU64::new(max_tx_size),
            state: Mutex::new(PoolState::default()),
            accepted,
        };
        (pool, rx)
    }

    /// Add a locally submitted transaction. Returns its hash when it is new,
    /// not banned and within the size limit.
    pub fn insert_local(&self, tx: TransactionEnvelope) -> Option<TxHash> {
        if self.is_oversized(&tx) {
            tracing::debug!(size = tx.payload.len(), "local transaction over size limit");
            return None;
        }
        let hash = hash_transaction(&tx.payload);
        self.insert(hash, tx).then_some(hash)
    }

    pub fn max_tx_size(&self) -> u64 {
        self.max_tx_size.load(Ordering::Acquire)
    }

    /// Raise the payload limit by `delta` bytes.
    pub fn raise_max_tx_size(&self, delta: u64) {
        let _ = self
            .max_tx_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |max| {
                Some(max.saturating_add(delta))
            });
    }

    fn is_oversized(&self, tx: &TransactionEnvelope) -> bool {
        tx.payload.len() as u64 > self.max_tx_size()
    }

    /// Ban `hash`; a held copy is evicted and demands for it are refused.
    pub fn ban(&self, hash: TxHash) {
        let mut state = self.state.lock();
        state.banned.insert(hash);
        if state.txs.remove(&hash).is_some() {
            state.order.retain(|h| *h != hash);
        }
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.state.lock().txs.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.state.lock().txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, hash: TxHash, tx: TransactionEnvelope) -> bool {
        let mut state = self.state.lock();
        if state.banned.contains(&hash) || state.txs.contains_key(&hash) {
            return false;
        }
        while state.txs.len() >= self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.txs.remove(&oldest);
        }
        state.txs.insert(hash, tx);
        state.order.push_back(hash);
        true
    }
}

impl TxPool for MemoryTxPool {
    fn get(&self, hash: &TxHash) -> Option<TransactionEnvelope> {
        self.state.lock().txs.get(hash).cloned()
    }

    fn is_banned(&self, hash: &TxHash) -> bool {
        self.state.lock().banned.contains(hash)
    }

    fn receive(&self, from: &NodeId, tx: TransactionEnvelope) -> TxReceiveOutcome {
        if self.is_oversized(&tx) {
            tracing::debug!(from = %from.short(), size = tx.payload.len(), "oversized transaction");
            return TxReceiveOutcome::Rejected;
        }
        let hash = hash_transaction(&tx.payload);
        if self.is_banned(&hash) {
            tracing::debug!(from = %from.short(), hash = %hash, "banned transaction");
            return TxReceiveOutcome::Rejected;
        }
        if !self.insert(hash, tx) {
            return TxReceiveOutcome::Duplicate;
        }
        let _ = self.accepted.send(hash);
        TxReceiveOutcome::Added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_types::PublicKey;

    fn tx(n: u8) -> TransactionEnvelope {
        TransactionEnvelope {
            payload: vec![n; 16],
        }
    }

    #[test]
    fn oldest_transaction_is_evicted_at_capacity() {
        let (pool, _rx) = MemoryTxPool::new(2, 1024);
        let first = pool.insert_local(tx(1)).unwrap();
        pool.insert_local(tx(2)).unwrap();
        pool.insert_local(tx(3)).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&first));
    }

    #[test]
    fn received_transactions_are_announced_once() {
        let (pool, mut rx) = MemoryTxPool::new(10, 1024);
        let from = PublicKey([1u8; 32]);
        assert_eq!(pool.receive(&from, tx(1)), TxReceiveOutcome::Added);
        assert_eq!(pool.receive(&from, tx(1)), TxReceiveOutcome::Duplicate);
        assert_eq!(rx.try_recv().unwrap(), hash_transaction(&tx(1).payload));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn banned_transactions_are_rejected_and_evicted() {
        let (pool, mut rx) = MemoryTxPool::new(10, 1024);
        let hash = pool.insert_local(tx(4)).unwrap();
        pool.ban(hash);
        assert!(pool.get(&hash).is_none());
        assert!(pool.is_banned(&hash));
        assert_eq!(
            pool.receive(&PublicKey([1u8; 32]), tx(4)),
            TxReceiveOutcome::Rejected
        );
        assert!(pool.insert_local(tx(4)).is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn transactions_over_the_size_limit_are_refused() {
        let (pool, mut rx) = MemoryTxPool::new(10, 16);
        let big = TransactionEnvelope {
            payload: vec![9; 17],
        };
        assert!(pool.insert_local(big.clone()).is_none());
        assert_eq!(
            pool.receive(&PublicKey([1u8; 32]), big.clone()),
            TxReceiveOutcome::Rejected
        );
        assert!(rx.try_recv().is_err());
        assert!(pool.insert_local(tx(1)).is_some());

        pool.raise_max_tx_size(1);
        assert_eq!(pool.max_tx_size(), 17);
        assert!(pool.insert_local(big).is_some());
    }
}
