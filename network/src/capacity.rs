//! Reading and writing budgets for one connection.
//!
//! Pure accounting, no I/O. A peer may only have a bounded amount of work
//! outstanding with us (`local` capacity, restored as we finish processing)
//! and we may only send it flood traffic it has granted us room for
//! (`outbound` capacity, restored by SEND_MORE).
//!
//! Two modes exist and exactly one is active per connection:
//!
//! - [`CapacityMode::Messages`]: every message costs one unit and both a
//!   total and a flood budget are tracked.
//! - [`CapacityMode::Bytes`]: a message costs its encoded size and only the
//!   flood budget is tracked.

use serde::Serialize;

/// Accounting unit of a connection's budgets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CapacityMode {
    Messages,
    Bytes,
}

impl CapacityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Bytes => "bytes",
        }
    }
}

/// Remaining (or maximum) local reading budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ReadingCapacity {
    pub flood: u64,
    /// Absent in byte mode.
    pub total: Option<u64>,
}

/// What one inbound message consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageCharge {
    /// Units in the connection's mode.
    pub cost: u64,
    /// Encoded size, charged against the node-wide flood budget.
    pub bytes: u64,
    pub flood: bool,
}

/// Per-connection capacity state.
#[derive(Clone, Debug)]
pub struct FlowControlCapacity {
    mode: CapacityMode,
    limits: ReadingCapacity,
    capacity: ReadingCapacity,
    outbound: u64,
}

impl FlowControlCapacity {
    /// Message-count accounting with separate flood and total limits.
    pub fn messages(flood_limit: u64, total_limit: u64) -> Self {
        let limits = ReadingCapacity {
            flood: flood_limit,
            total: Some(total_limit),
        };
        Self {
            mode: CapacityMode::Messages,
            limits,
            capacity: limits,
            outbound: 0,
        }
    }

    /// Byte accounting; only flood traffic is rationed.
    pub fn bytes(flood_limit: u64) -> Self {
        let limits = ReadingCapacity {
            flood: flood_limit,
            total: None,
        };
        Self {
            mode: CapacityMode::Bytes,
            limits,
            capacity: limits,
            outbound: 0,
        }
    }

    pub fn mode(&self) -> CapacityMode {
        self.mode
    }

    /// Cost of a message of `encoded_size` bytes in this mode.
    pub fn cost_of(&self, encoded_size: u64) -> u64 {
        match self.mode {
            CapacityMode::Messages => 1,
            CapacityMode::Bytes => encoded_size,
        }
    }

    pub fn capacity(&self) -> ReadingCapacity {
        self.capacity
    }

    pub fn limits(&self) -> ReadingCapacity {
        self.limits
    }

    pub fn outbound(&self) -> u64 {
        self.outbound
    }

    /// Whether more inbound messages may be read right now.
    pub fn can_read(&self) -> bool {
        match self.capacity.total {
            Some(total) => total > 0,
            None => true,
        }
    }

    /// Reserve local capacity for an inbound message.
    ///
    /// Returns `false` without touching any budget when the total or (for
    /// flood messages) the flood budget cannot cover the cost.
    pub fn lock_local(&mut self, cost: u64, flood: bool) -> bool {
        if let Some(total) = self.capacity.total {
            if total < cost {
                return false;
            }
        }
        if flood && self.capacity.flood < cost {
            return false;
        }
        if let Some(total) = self.capacity.total.as_mut() {
            *total -= cost;
        }
        if flood {
            self.capacity.flood -= cost;
        }
        self.check_invariant();
        true
    }

    /// Return a previously locked amount. Yields the flood units released.
    pub fn release_local(&mut self, cost: u64, flood: bool) -> u64 {
        if let Some(total) = self.capacity.total.as_mut() {
            *total += cost;
        }
        let released = if flood {
            self.capacity.flood += cost;
            cost
        } else {
            0
        };
        self.check_invariant();
        released
    }

    /// Non-flood messages are never gated.
    pub fn has_outbound(&self, cost: u64, flood: bool) -> bool {
        !flood || self.outbound >= cost
    }

    pub fn lock_outbound(&mut self, cost: u64, flood: bool) {
        assert!(
            self.has_outbound(cost, flood),
            "lock_outbound without capacity: have {}, need {}",
            self.outbound,
            cost
        );
        if flood {
            self.outbound -= cost;
        }
    }

    /// Credit a grant from the remote. Returns `false` on overflow, leaving
    /// the counter untouched.
    pub fn release_outbound(&mut self, amount: u64) -> bool {
        match self.outbound.checked_add(amount) {
            Some(total) => {
                self.outbound = total;
                true
            }
            None => false,
        }
    }

    /// Grow the flood budget and its limit by `delta` bytes.
    pub fn handle_tx_size_increase(&mut self, delta: u64) {
        assert_eq!(
            self.mode,
            CapacityMode::Bytes,
            "tx size increase only applies in byte mode"
        );
        self.capacity.flood += delta;
        self.limits.flood += delta;
        self.check_invariant();
    }

    fn check_invariant(&self) {
        assert!(
            self.capacity.flood <= self.limits.flood,
            "flood capacity {} exceeds limit {}",
            self.capacity.flood,
            self.limits.flood
        );
        match (self.capacity.total, self.limits.total) {
            (Some(total), Some(limit)) => assert!(
                total <= limit,
                "total capacity {total} exceeds limit {limit}"
            ),
            (None, None) => {}
            _ => panic!("total capacity tracked inconsistently"),
        }
    }
}
