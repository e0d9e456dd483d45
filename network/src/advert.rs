//! Per-peer advert/demand state.
//!
//! Outgoing: transaction hashes waiting to be announced in a FLOOD_ADVERT.
//! Incoming: hashes the peer announced, waiting for the overlay to decide
//! what to demand. History: which hashes the peer is known to have, keyed to
//! the ledger at which we heard about them.
//!
//! Timers live in the peer; this type only decides what to send.

use std::collections::VecDeque;

use peerlink_types::TxHash;
use serde::Serialize;

use crate::cache::RandomEvictionCache;
use crate::config::OverlayConfig;

/// Result of queueing one outgoing hash.
#[derive(Debug, PartialEq, Eq)]
pub enum OutgoingAdvert {
    /// Queue was full; the hash was discarded.
    Dropped,
    /// Queued. `arm_timer` is set when this is the first pending hash.
    Queued { arm_timer: bool },
    /// The batch threshold was crossed; send these now.
    Flush(Vec<TxHash>),
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct AdvertCounters {
    pub outgoing_dropped: u64,
    pub incoming_trimmed: u64,
    pub hashes_advertised: u64,
    pub hashes_received: u64,
}

pub struct TxAdverts {
    outgoing: Vec<TxHash>,
    incoming: VecDeque<TxHash>,
    history: RandomEvictionCache<TxHash, u32>,
    batch_size: usize,
    outgoing_max: usize,
    incoming_max: usize,
    counters: AdvertCounters,
}

impl TxAdverts {
    pub fn new(config: &OverlayConfig) -> Self {
        Self {
            outgoing: Vec::new(),
            incoming: VecDeque::new(),
            history: RandomEvictionCache::new(config.advert_history_capacity),
            batch_size: config.flood_advert_batch_size.max(1),
            outgoing_max: config.tx_advert_queue_max_size,
            incoming_max: config.incoming_advert_queue_max_size,
            counters: AdvertCounters::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Outgoing
    // -----------------------------------------------------------------------

    pub fn queue_outgoing(&mut self, hash: TxHash) -> OutgoingAdvert {
        if self.outgoing.len() >= self.outgoing_max {
            self.counters.outgoing_dropped += 1;
            tracing::trace!(hash = %hash, "advert queue full, dropping hash");
            return OutgoingAdvert::Dropped;
        }
        let arm_timer = self.outgoing.is_empty();
        self.outgoing.push(hash);
        if self.outgoing.len() > self.batch_size {
            let rest = self.outgoing.split_off(self.batch_size);
            let batch = std::mem::replace(&mut self.outgoing, rest);
            self.counters.hashes_advertised += batch.len() as u64;
            return OutgoingAdvert::Flush(batch);
        }
        OutgoingAdvert::Queued { arm_timer }
    }

    /// Everything pending, oldest first. Called when the flush timer fires.
    pub fn take_outgoing(&mut self) -> Vec<TxHash> {
        let batch = std::mem::take(&mut self.outgoing);
        self.counters.hashes_advertised += batch.len() as u64;
        batch
    }

    pub fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }

    // -----------------------------------------------------------------------
    // Incoming
    // -----------------------------------------------------------------------

    /// Record hashes announced by the peer at `ledger_seq` and queue them for
    /// demand evaluation. The oldest queued hashes are trimmed past the cap.
    pub fn receive_advert(&mut self, hashes: &[TxHash], ledger_seq: u32) {
        self.counters.hashes_received += hashes.len() as u64;
        for hash in hashes {
            self.history.insert(*hash, ledger_seq);
            self.incoming.push_back(*hash);
        }
        while self.incoming.len() > self.incoming_max {
            self.incoming.pop_front();
            self.counters.incoming_trimmed += 1;
        }
    }

    pub fn pop_incoming(&mut self) -> Option<TxHash> {
        self.incoming.pop_front()
    }

    pub fn incoming_len(&self) -> usize {
        self.incoming.len()
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    pub fn remember(&mut self, hash: TxHash, ledger_seq: u32) {
        self.history.insert(hash, ledger_seq);
    }

    pub fn seen(&self, hash: &TxHash) -> bool {
        self.history.contains(hash)
    }

    /// Forget hashes heard before `ledger_seq`.
    pub fn clear_below(&mut self, ledger_seq: u32) {
        self.history.retain(|_, seq| *seq >= ledger_seq);
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn counters(&self) -> &AdvertCounters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_types::Hash256;

    fn hash(n: u32) -> TxHash {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&n.to_be_bytes());
        Hash256::new(bytes)
    }

    fn make_adverts(batch: usize, max: usize) -> TxAdverts {
        let config = OverlayConfig {
            flood_advert_batch_size: batch,
            tx_advert_queue_max_size: max,
            incoming_advert_queue_max_size: 3,
            advert_history_capacity: 100,
            ..OverlayConfig::default()
        };
        TxAdverts::new(&config)
    }

    #[test]
    fn first_hash_arms_timer() {
        let mut adverts = make_adverts(100, 1_000);
        assert_eq!(
            adverts.queue_outgoing(hash(1)),
            OutgoingAdvert::Queued { arm_timer: true }
        );
        assert_eq!(
            adverts.queue_outgoing(hash(2)),
            OutgoingAdvert::Queued { arm_timer: false }
        );
    }

    #[test]
    fn crossing_threshold_flushes_first_batch() {
        let mut adverts = make_adverts(100, 1_000);
        for i in 0..100 {
            assert!(matches!(
                adverts.queue_outgoing(hash(i)),
                OutgoingAdvert::Queued { .. }
            ));
        }
        match adverts.queue_outgoing(hash(100)) {
            OutgoingAdvert::Flush(batch) => {
                assert_eq!(batch.len(), 100);
                assert_eq!(batch[0], hash(0));
                assert_eq!(batch[99], hash(99));
            }
            other => panic!("expected flush, got {other:?}"),
        }
        assert_eq!(adverts.take_outgoing(), vec![hash(100)]);
        assert_eq!(adverts.counters().hashes_advertised, 101);
    }

    #[test]
    fn full_queue_drops_newest() {
        let mut adverts = make_adverts(10, 3);
        for i in 0..3 {
            adverts.queue_outgoing(hash(i));
        }
        assert_eq!(adverts.queue_outgoing(hash(3)), OutgoingAdvert::Dropped);
        assert_eq!(adverts.take_outgoing(), vec![hash(0), hash(1), hash(2)]);
        assert_eq!(adverts.counters().outgoing_dropped, 1);
    }

    #[test]
    fn incoming_queue_trims_oldest() {
        let mut adverts = make_adverts(10, 10);
        adverts.receive_advert(&[hash(1), hash(2), hash(3), hash(4)], 7);
        assert_eq!(adverts.incoming_len(), 3);
        assert_eq!(adverts.pop_incoming(), Some(hash(2)));
        assert_eq!(adverts.counters().incoming_trimmed, 1);
        // trimmed hashes stay in the history
        assert!(adverts.seen(&hash(1)));
    }

    #[test]
    fn clear_below_prunes_history_by_ledger() {
        let mut adverts = make_adverts(10, 10);
        adverts.receive_advert(&[hash(1)], 5);
        adverts.remember(hash(2), 9);
        adverts.clear_below(6);
        assert!(!adverts.seen(&hash(1)));
        assert!(adverts.seen(&hash(2)));
        assert_eq!(adverts.history_len(), 1);
    }
}
