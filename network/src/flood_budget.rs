//! Node-wide byte budget for inbound flood traffic.
//!
//! Shared by every connection; the only cross-connection mutable state in
//! the overlay. Updated exclusively with atomic compare-and-swap or
//! fetch-add, never with a separate read and write.

use std::sync::atomic::{AtomicU64, Ordering};

pub struct SharedFloodBudget {
    limit: u64,
    available: AtomicU64,
}

impl SharedFloodBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            available: AtomicU64::new(limit),
        }
    }

    /// Reserve as much of `bytes` as is available and return the amount
    /// actually reserved.
    pub fn reserve_up_to(&self, bytes: u64) -> u64 {
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |available| {
                (available > 0 && bytes > 0).then(|| available.saturating_sub(bytes))
            })
            .map_or(0, |previous| previous.min(bytes))
    }

    pub fn release(&self, bytes: u64) {
        let previous = self.available.fetch_add(bytes, Ordering::AcqRel);
        assert!(
            previous + bytes <= self.limit,
            "flood budget released beyond its limit"
        );
    }

    pub fn available(&self) -> u64 {
        self.available.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn reserve_and_release() {
        let budget = SharedFloodBudget::new(100);
        assert_eq!(budget.reserve_up_to(60), 60);
        assert_eq!(budget.reserve_up_to(50), 40);
        assert_eq!(budget.reserve_up_to(1), 0);
        assert_eq!(budget.available(), 0);
        budget.release(100);
        assert_eq!(budget.available(), 100);
    }

    #[test]
    fn concurrent_reservations_never_oversubscribe() {
        let budget = Arc::new(SharedFloodBudget::new(1_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let budget = Arc::clone(&budget);
                std::thread::spawn(move || (0..500).map(|_| budget.reserve_up_to(1)).sum::<u64>())
            })
            .collect();
        let granted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 1_000);
        assert_eq!(budget.available(), 0);
    }

    #[test]
    #[should_panic(expected = "beyond its limit")]
    fn over_release_aborts() {
        let budget = SharedFloodBudget::new(10);
        budget.release(1);
    }
}
