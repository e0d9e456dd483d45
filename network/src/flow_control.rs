//! Flow-control engine: capacity accounting plus the protocol around it.
//!
//! Created when a connection authenticates. Inbound, it locks capacity for
//! every message and emits SEND_MORE / SEND_MORE_EXTENDED grants as flood
//! capacity is released. Outbound, it parks flood messages in priority
//! queues until the remote has granted room for them.
//!
//! In byte mode a node-wide [`SharedFloodBudget`] may back the grants: every
//! granted byte is reserved from it first, and whatever it cannot cover is
//! withheld until a later release or [`FlowControl::retry_withheld_grant`].
//! A peer that stays inside its grants therefore never finds the node
//! budget exhausted.

use std::collections::VecDeque;
use std::sync::Arc;

use peerlink_messages::{MessageType, OverlayMessage, SendMore, SendMoreExtended};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::capacity::{CapacityMode, FlowControlCapacity, MessageCharge, ReadingCapacity};
use crate::config::OverlayConfig;
use crate::flood_budget::SharedFloodBudget;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlowControlError {
    #[error("unexpected flood message, peer at capacity")]
    FloodCapacityExceeded,

    #[error("unexpected message, peer at total capacity")]
    TotalCapacityExceeded,

    #[error("unexpected {0} with {1} flow control")]
    WrongGrantType(MessageType, &'static str),

    #[error("invalid SEND_MORE: zero amount")]
    EmptyGrant,

    #[error("peer capacity overflow")]
    OutboundOverflow,
}

/// Outbound flood queues, drained in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutboundPriority {
    Consensus = 0,
    Transaction = 1,
    Demand = 2,
    Advert = 3,
}

impl OutboundPriority {
    const ALL: [OutboundPriority; 4] = [
        OutboundPriority::Consensus,
        OutboundPriority::Transaction,
        OutboundPriority::Demand,
        OutboundPriority::Advert,
    ];

    pub fn of(msg_type: MessageType) -> Self {
        match msg_type {
            MessageType::ScpMessage => Self::Consensus,
            MessageType::FloodDemand => Self::Demand,
            MessageType::FloodAdvert => Self::Advert,
            MessageType::Transaction
            | MessageType::Error
            | MessageType::Hello
            | MessageType::Auth
            | MessageType::DontHave
            | MessageType::GetPeers
            | MessageType::Peers
            | MessageType::GetTxSet
            | MessageType::TxSet
            | MessageType::GetScpQuorumSet
            | MessageType::ScpQuorumSet
            | MessageType::GetScpState
            | MessageType::SendMore
            | MessageType::SendMoreExtended => Self::Transaction,
        }
    }
}

struct QueuedMessage {
    message: OverlayMessage,
    cost: u64,
}

/// Serializable view of the engine for diagnostics.
#[derive(Clone, Debug, Serialize)]
pub struct FlowControlSnapshot {
    pub mode: CapacityMode,
    pub local_capacity: ReadingCapacity,
    pub local_limits: ReadingCapacity,
    pub outbound_capacity: u64,
    pub released_since_grant: u64,
    pub queued_scp: usize,
    pub queued_tx: usize,
    pub queued_demand: usize,
    pub queued_advert: usize,
    pub dropped_from_queues: u64,
    pub dropped_oversized: u64,
    pub grant_withheld: bool,
}

pub struct FlowControl {
    capacity: FlowControlCapacity,
    batch_size: u64,
    released_since_grant: u64,
    queues: [VecDeque<QueuedMessage>; 4],
    queue_limits: [Option<usize>; 4],
    no_outbound_capacity_since: Option<Instant>,
    /// Node-wide budget backing byte-mode grants.
    flood_budget: Option<Arc<SharedFloodBudget>>,
    /// Bytes reserved from `flood_budget`: granted to the remote or locked
    /// by a message in processing.
    reserved_budget_bytes: u64,
    /// The last grant was cut short by the node budget.
    grant_withheld: bool,
    dropped_from_queues: u64,
    dropped_oversized: u64,
}

impl FlowControl {
    pub fn new(
        mode: CapacityMode,
        config: &OverlayConfig,
        flood_budget: Option<Arc<SharedFloodBudget>>,
    ) -> Self {
        let (capacity, batch_size) = match mode {
            CapacityMode::Messages => (
                FlowControlCapacity::messages(
                    config.peer_flood_reading_capacity,
                    config.peer_reading_capacity,
                ),
                config.flow_control_send_more_batch_size,
            ),
            CapacityMode::Bytes => (
                FlowControlCapacity::bytes(config.peer_flood_reading_capacity_bytes),
                config.flow_control_send_more_batch_size_bytes,
            ),
        };
        // the budget is denominated in bytes, so only byte grants draw on it
        let flood_budget = flood_budget.filter(|_| mode == CapacityMode::Bytes);
        Self {
            capacity,
            batch_size,
            released_since_grant: 0,
            queues: Default::default(),
            queue_limits: [
                None,
                Some(config.outbound_tx_queue_limit),
                Some(config.outbound_demand_queue_limit),
                Some(config.outbound_advert_queue_limit),
            ],
            no_outbound_capacity_since: None,
            flood_budget,
            reserved_budget_bytes: 0,
            grant_withheld: false,
            dropped_from_queues: 0,
            dropped_oversized: 0,
        }
    }

    pub fn mode(&self) -> CapacityMode {
        self.capacity.mode()
    }

    pub fn capacity(&self) -> &FlowControlCapacity {
        &self.capacity
    }

    /// First grant, covering the whole flood limit (or as much of it as the
    /// node budget allows). `None` when the budget has nothing left.
    pub fn initial_grant(&mut self) -> Option<OverlayMessage> {
        self.released_since_grant = 0;
        self.grant(self.capacity.limits().flood)
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Reserve capacity for an inbound message of `encoded_size` bytes.
    pub fn lock_local_capacity(
        &mut self,
        encoded_size: u64,
        flood: bool,
    ) -> Result<MessageCharge, FlowControlError> {
        let cost = self.capacity.cost_of(encoded_size);
        let current = self.capacity.capacity();
        if matches!(current.total, Some(total) if total < cost) {
            return Err(FlowControlError::TotalCapacityExceeded);
        }
        if flood && current.flood < cost {
            return Err(FlowControlError::FloodCapacityExceeded);
        }
        // Released units not yet granted back are off limits while a budget
        // backs the grants: only what the remote holds was reserved.
        if flood
            && self.flood_budget.is_some()
            && current.flood.saturating_sub(self.released_since_grant) < cost
        {
            return Err(FlowControlError::FloodCapacityExceeded);
        }
        let locked = self.capacity.lock_local(cost, flood);
        assert!(locked, "capacity lock failed after successful pre-check");
        Ok(MessageCharge {
            cost,
            bytes: encoded_size,
            flood,
        })
    }

    /// Return the capacity of a processed message. Yields the grant to send,
    /// if one is due.
    pub fn release_local_capacity(&mut self, charge: MessageCharge) -> Option<OverlayMessage> {
        let was_exhausted = self.capacity.capacity().flood == 0;
        let released = self.capacity.release_local(charge.cost, charge.flood);
        if let Some(budget) = self.flood_budget.as_ref().filter(|_| released > 0) {
            budget.release(released);
            self.reserved_budget_bytes -= released;
        }
        self.released_since_grant += released;
        let due = self.grant_withheld
            || self.released_since_grant >= self.batch_size
            || (was_exhausted && released > 0);
        if due && self.released_since_grant > 0 {
            let amount = std::mem::take(&mut self.released_since_grant);
            self.grant(amount)
        } else {
            None
        }
    }

    /// Grant what a short node budget held back earlier, now that other
    /// peers may have returned some of it.
    pub fn retry_withheld_grant(&mut self) -> Option<OverlayMessage> {
        if !self.grant_withheld || self.released_since_grant == 0 {
            return None;
        }
        let amount = std::mem::take(&mut self.released_since_grant);
        self.grant(amount)
    }

    pub fn can_read(&self) -> bool {
        self.capacity.can_read()
    }

    /// Grow the byte-mode flood budget. Returns the grant announcing the
    /// extra room to the remote.
    pub fn handle_tx_size_increase(&mut self, delta: u64) -> Option<OverlayMessage> {
        self.capacity.handle_tx_size_increase(delta);
        self.grant(delta)
    }

    /// Grant up to `amount` units. With a node budget only the reservable
    /// part is granted; the rest stays in `released_since_grant`.
    fn grant(&mut self, amount: u64) -> Option<OverlayMessage> {
        let granted = match &self.flood_budget {
            Some(budget) => {
                let reserved = budget.reserve_up_to(amount);
                self.reserved_budget_bytes += reserved;
                reserved
            }
            None => amount,
        };
        self.grant_withheld = granted < amount;
        self.released_since_grant += amount - granted;
        if self.grant_withheld {
            tracing::debug!(wanted = amount, granted, "node flood budget short, grant withheld");
        }
        (granted > 0).then(|| self.grant_message(granted))
    }

    fn grant_message(&self, amount: u64) -> OverlayMessage {
        // amounts beyond u32 are clipped; limits are configured far below
        let amount = u32::try_from(amount).unwrap_or(u32::MAX);
        match self.capacity.mode() {
            CapacityMode::Messages => OverlayMessage::SendMore(SendMore {
                num_messages: amount,
            }),
            CapacityMode::Bytes => OverlayMessage::SendMoreExtended(SendMoreExtended {
                num_messages: 0,
                num_bytes: amount,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Units granted by a SEND_MORE, or why it is invalid for this mode.
    pub fn is_send_more_valid(&self, msg: &OverlayMessage) -> Result<u64, FlowControlError> {
        let amount = match (self.capacity.mode(), msg) {
            (CapacityMode::Messages, OverlayMessage::SendMore(m)) => u64::from(m.num_messages),
            (CapacityMode::Bytes, OverlayMessage::SendMoreExtended(m)) => u64::from(m.num_bytes),
            (mode, other) => {
                return Err(FlowControlError::WrongGrantType(
                    other.message_type(),
                    mode.as_str(),
                ))
            }
        };
        if amount == 0 {
            return Err(FlowControlError::EmptyGrant);
        }
        if self.capacity.outbound().checked_add(amount).is_none() {
            return Err(FlowControlError::OutboundOverflow);
        }
        Ok(amount)
    }

    /// Credit a received grant.
    pub fn receive_grant(&mut self, msg: &OverlayMessage) -> Result<(), FlowControlError> {
        let amount = self.is_send_more_valid(msg)?;
        if !self.capacity.release_outbound(amount) {
            return Err(FlowControlError::OutboundOverflow);
        }
        Ok(())
    }

    /// Park a flood message until outbound capacity allows sending it.
    /// Returns how many queued messages were trimmed to make room.
    pub fn enqueue(&mut self, message: OverlayMessage, encoded_size: u64) -> usize {
        let priority = OutboundPriority::of(message.message_type());
        let cost = self.capacity.cost_of(encoded_size);
        let queue = &mut self.queues[priority as usize];
        queue.push_back(QueuedMessage { message, cost });
        let mut trimmed = 0;
        if let Some(limit) = self.queue_limits[priority as usize] {
            while queue.len() > limit {
                queue.pop_front();
                trimmed += 1;
            }
        }
        self.dropped_from_queues += trimmed as u64;
        trimmed
    }

    /// Dequeue every message the current outbound capacity covers, highest
    /// priority first. Stops at the first message that does not fit yet; a
    /// message costing more than a whole flood limit never will, and is
    /// discarded.
    pub fn take_sendable(&mut self, now: Instant) -> Vec<OverlayMessage> {
        let mut ready = Vec::new();
        let flood_limit = self.capacity.limits().flood;
        'queues: for priority in OutboundPriority::ALL {
            let queue = &mut self.queues[priority as usize];
            while let Some(front) = queue.front() {
                if front.cost > flood_limit {
                    tracing::debug!(cost = front.cost, flood_limit, "discarding oversized flood message");
                    queue.pop_front();
                    self.dropped_oversized += 1;
                    continue;
                }
                if !self.capacity.has_outbound(front.cost, true) {
                    break 'queues;
                }
                self.capacity.lock_outbound(front.cost, true);
                if let Some(item) = queue.pop_front() {
                    ready.push(item.message);
                }
            }
        }
        if self.queues.iter().all(VecDeque::is_empty) {
            self.no_outbound_capacity_since = None;
        } else if self.no_outbound_capacity_since.is_none() {
            self.no_outbound_capacity_since = Some(now);
        }
        ready
    }

    /// When flood sending first blocked on missing capacity, if it still is.
    pub fn no_outbound_capacity_since(&self) -> Option<Instant> {
        self.no_outbound_capacity_since
    }

    pub fn queued(&self, priority: OutboundPriority) -> usize {
        self.queues[priority as usize].len()
    }

    pub fn snapshot(&self) -> FlowControlSnapshot {
        FlowControlSnapshot {
            mode: self.capacity.mode(),
            local_capacity: self.capacity.capacity(),
            local_limits: self.capacity.limits(),
            outbound_capacity: self.capacity.outbound(),
            released_since_grant: self.released_since_grant,
            queued_scp: self.queued(OutboundPriority::Consensus),
            queued_tx: self.queued(OutboundPriority::Transaction),
            queued_demand: self.queued(OutboundPriority::Demand),
            queued_advert: self.queued(OutboundPriority::Advert),
            dropped_from_queues: self.dropped_from_queues,
            dropped_oversized: self.dropped_oversized,
            grant_withheld: self.grant_withheld,
        }
    }
}

impl Drop for FlowControl {
    fn drop(&mut self) {
        // grants the remote never used and charges still held by unfinished
        // tasks die with the connection
        if let Some(budget) = &self.flood_budget {
            if self.reserved_budget_bytes > 0 {
                budget.release(self.reserved_budget_bytes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_messages::{FloodAdvert, ScpEnvelope, TransactionEnvelope};
    use peerlink_types::Hash256;

    fn message_mode() -> FlowControl {
        let config = OverlayConfig {
            peer_flood_reading_capacity: 4,
            peer_reading_capacity: 5,
            flow_control_send_more_batch_size: 2,
            ..OverlayConfig::default()
        };
        FlowControl::new(CapacityMode::Messages, &config, None)
    }

    fn bytes_config() -> OverlayConfig {
        OverlayConfig {
            peer_flood_reading_capacity_bytes: 1_000,
            flow_control_send_more_batch_size_bytes: 500,
            ..OverlayConfig::default()
        }
    }

    fn byte_mode() -> FlowControl {
        FlowControl::new(CapacityMode::Bytes, &bytes_config(), None)
    }

    fn budgeted(budget: &Arc<SharedFloodBudget>) -> FlowControl {
        FlowControl::new(CapacityMode::Bytes, &bytes_config(), Some(Arc::clone(budget)))
    }

    fn tx(n: u8) -> OverlayMessage {
        OverlayMessage::Transaction(TransactionEnvelope { payload: vec![n] })
    }

    #[test]
    fn initial_grant_matches_mode() {
        assert_eq!(
            message_mode().initial_grant(),
            Some(OverlayMessage::SendMore(SendMore { num_messages: 4 }))
        );
        assert_eq!(byte_mode().initial_grant(), extended(1_000));
    }

    #[test]
    fn grant_emitted_once_batch_released() {
        let mut fc = message_mode();
        let a = fc.lock_local_capacity(10, true).unwrap();
        let b = fc.lock_local_capacity(10, true).unwrap();
        assert!(fc.release_local_capacity(a).is_none());
        assert_eq!(
            fc.release_local_capacity(b),
            Some(OverlayMessage::SendMore(SendMore { num_messages: 2 }))
        );
    }

    #[test]
    fn grant_emitted_when_flood_capacity_recovers_from_exhaustion() {
        let config = OverlayConfig {
            peer_flood_reading_capacity: 2,
            peer_reading_capacity: 5,
            flow_control_send_more_batch_size: 2,
            ..OverlayConfig::default()
        };
        let mut fc = FlowControl::new(CapacityMode::Messages, &config, None);
        let a = fc.lock_local_capacity(10, true).unwrap();
        let b = fc.lock_local_capacity(10, true).unwrap();
        assert_eq!(
            fc.lock_local_capacity(10, true),
            Err(FlowControlError::FloodCapacityExceeded)
        );
        assert_eq!(
            fc.release_local_capacity(a),
            Some(OverlayMessage::SendMore(SendMore { num_messages: 1 }))
        );
        assert!(fc.release_local_capacity(b).is_none());
    }

    #[test]
    fn non_flood_release_never_grants() {
        let mut fc = message_mode();
        let charge = fc.lock_local_capacity(10, false).unwrap();
        assert!(fc.release_local_capacity(charge).is_none());
    }

    #[test]
    fn total_exhaustion_is_reported_distinctly() {
        let mut fc = message_mode();
        for _ in 0..5 {
            fc.lock_local_capacity(1, false).unwrap();
        }
        assert!(!fc.can_read());
        assert_eq!(
            fc.lock_local_capacity(1, false),
            Err(FlowControlError::TotalCapacityExceeded)
        );
    }

    fn extended(num_bytes: u32) -> Option<OverlayMessage> {
        Some(OverlayMessage::SendMoreExtended(SendMoreExtended {
            num_messages: 0,
            num_bytes,
        }))
    }

    #[test]
    fn grants_never_exceed_node_budget() {
        let budget = Arc::new(SharedFloodBudget::new(1_500));
        let mut a = budgeted(&budget);
        let mut b = budgeted(&budget);
        assert_eq!(a.initial_grant(), extended(1_000));
        assert_eq!(b.initial_grant(), extended(500));
        assert!(b.snapshot().grant_withheld);
        assert_eq!(budget.available(), 0);
    }

    #[test]
    fn traffic_inside_grant_is_admitted_when_budget_is_empty() {
        let budget = Arc::new(SharedFloodBudget::new(1_000));
        let mut fc = budgeted(&budget);
        assert_eq!(fc.initial_grant(), extended(1_000));
        assert_eq!(budget.available(), 0);
        let a = fc.lock_local_capacity(600, true).unwrap();
        let b = fc.lock_local_capacity(400, true).unwrap();
        assert_eq!(fc.release_local_capacity(a), extended(600));
        // below the batch size: not granted yet, so back in the node pool
        assert_eq!(fc.release_local_capacity(b), None);
        assert_eq!(budget.available(), 400);
    }

    #[test]
    fn withheld_grant_follows_returned_budget() {
        let budget = Arc::new(SharedFloodBudget::new(1_000));
        let mut a = budgeted(&budget);
        let mut b = budgeted(&budget);
        assert_eq!(a.initial_grant(), extended(1_000));
        assert_eq!(b.initial_grant(), None);
        assert_eq!(b.retry_withheld_grant(), None);

        drop(a);
        assert_eq!(b.retry_withheld_grant(), extended(1_000));
        assert!(!b.snapshot().grant_withheld);
        assert_eq!(b.retry_withheld_grant(), None);
    }

    #[test]
    fn flood_beyond_withheld_grant_is_refused() {
        let budget = Arc::new(SharedFloodBudget::new(300));
        let mut fc = budgeted(&budget);
        assert_eq!(fc.initial_grant(), extended(300));
        assert_eq!(
            fc.lock_local_capacity(301, true),
            Err(FlowControlError::FloodCapacityExceeded)
        );
        fc.lock_local_capacity(300, true).unwrap();
        assert!(fc.lock_local_capacity(1, false).is_ok());
    }

    #[test]
    fn message_mode_ignores_byte_budget() {
        let budget = Arc::new(SharedFloodBudget::new(10));
        let mut fc = FlowControl::new(
            CapacityMode::Messages,
            &OverlayConfig::default(),
            Some(Arc::clone(&budget)),
        );
        assert_eq!(
            fc.initial_grant(),
            Some(OverlayMessage::SendMore(SendMore { num_messages: 200 }))
        );
        fc.lock_local_capacity(5_000, true).unwrap();
        assert_eq!(budget.available(), 10);
    }

    #[test]
    fn dropping_engine_returns_outstanding_budget() {
        let budget = Arc::new(SharedFloodBudget::new(5_000));
        let mut fc = budgeted(&budget);
        fc.initial_grant();
        fc.lock_local_capacity(700, true).unwrap();
        assert_eq!(budget.available(), 4_000);
        drop(fc);
        assert_eq!(budget.available(), 5_000);
    }

    #[test]
    fn send_more_validation() {
        let fc = message_mode();
        assert_eq!(
            fc.is_send_more_valid(&OverlayMessage::SendMore(SendMore { num_messages: 0 })),
            Err(FlowControlError::EmptyGrant)
        );
        assert!(matches!(
            fc.is_send_more_valid(&OverlayMessage::SendMoreExtended(SendMoreExtended {
                num_messages: 1,
                num_bytes: 1
            })),
            Err(FlowControlError::WrongGrantType(MessageType::SendMoreExtended, "messages"))
        ));
        assert_eq!(
            fc.is_send_more_valid(&OverlayMessage::SendMore(SendMore { num_messages: 7 })),
            Ok(7)
        );
    }

    #[test]
    fn flood_waits_for_grant_then_drains() {
        let mut fc = message_mode();
        let now = Instant::now();
        fc.enqueue(tx(1), 10);
        assert!(fc.take_sendable(now).is_empty());
        assert_eq!(fc.no_outbound_capacity_since(), Some(now));

        fc.receive_grant(&OverlayMessage::SendMore(SendMore { num_messages: 1 }))
            .unwrap();
        assert_eq!(fc.take_sendable(now), vec![tx(1)]);
        assert_eq!(fc.capacity().outbound(), 0);
        assert_eq!(fc.no_outbound_capacity_since(), None);

        fc.enqueue(tx(2), 10);
        assert!(fc.take_sendable(now).is_empty());
    }

    #[test]
    fn consensus_drains_before_transactions() {
        let mut fc = message_mode();
        let scp = OverlayMessage::ScpMessage(ScpEnvelope {
            slot_index: 1,
            payload: vec![],
        });
        fc.enqueue(tx(1), 10);
        fc.enqueue(scp.clone(), 10);
        fc.receive_grant(&OverlayMessage::SendMore(SendMore { num_messages: 1 }))
            .unwrap();
        assert_eq!(fc.take_sendable(Instant::now()), vec![scp]);
        assert_eq!(fc.queued(OutboundPriority::Transaction), 1);
    }

    #[test]
    fn advert_queue_trims_oldest() {
        let config = OverlayConfig {
            outbound_advert_queue_limit: 2,
            ..OverlayConfig::default()
        };
        let mut fc = FlowControl::new(CapacityMode::Messages, &config, None);
        let advert = |n: u8| {
            OverlayMessage::FloodAdvert(FloodAdvert {
                tx_hashes: vec![Hash256::new([n; 32])],
            })
        };
        assert_eq!(fc.enqueue(advert(1), 10), 0);
        assert_eq!(fc.enqueue(advert(2), 10), 0);
        assert_eq!(fc.enqueue(advert(3), 10), 1);
        fc.receive_grant(&OverlayMessage::SendMore(SendMore { num_messages: 5 }))
            .unwrap();
        assert_eq!(
            fc.take_sendable(Instant::now()),
            vec![advert(2), advert(3)]
        );
        assert_eq!(fc.snapshot().dropped_from_queues, 1);
    }

    #[test]
    fn byte_mode_charges_encoded_size() {
        let mut fc = byte_mode();
        fc.enqueue(tx(1), 300);
        fc.receive_grant(&OverlayMessage::SendMoreExtended(SendMoreExtended {
            num_messages: 0,
            num_bytes: 299,
        }))
        .unwrap();
        assert!(fc.take_sendable(Instant::now()).is_empty());
        fc.receive_grant(&OverlayMessage::SendMoreExtended(SendMoreExtended {
            num_messages: 0,
            num_bytes: 1,
        }))
        .unwrap();
        assert_eq!(fc.take_sendable(Instant::now()).len(), 1);
        assert_eq!(fc.capacity().outbound(), 0);
    }

    #[test]
    fn message_larger_than_flood_limit_does_not_block_the_queues() {
        let mut fc = byte_mode();
        let advert = OverlayMessage::FloodAdvert(FloodAdvert {
            tx_hashes: vec![Hash256::new([1; 32])],
        });
        fc.enqueue(tx(1), 1_001);
        fc.enqueue(advert.clone(), 50);
        fc.receive_grant(&OverlayMessage::SendMoreExtended(SendMoreExtended {
            num_messages: 0,
            num_bytes: 1_000,
        }))
        .unwrap();
        assert_eq!(fc.take_sendable(Instant::now()), vec![advert]);
        let snapshot = fc.snapshot();
        assert_eq!(snapshot.dropped_oversized, 1);
        assert_eq!(snapshot.queued_tx, 0);
        assert_eq!(snapshot.outbound_capacity, 950);
        assert_eq!(fc.no_outbound_capacity_since(), None);
    }

    #[test]
    fn tx_size_increase_announces_delta() {
        let mut fc = byte_mode();
        assert_eq!(fc.handle_tx_size_increase(200), extended(200));
        assert_eq!(fc.capacity().limits().flood, 1_200);
    }
}
