//! Bounded pending-entry queue (§4.5): holds MARGINAL/POOR signals that
//! were not executed outright, waiting for price to touch a more
//! favorable `optimal_entry`, or expiring after `max_wait_bars`.

use std::collections::VecDeque;

use bc_schemas::{Side, Signal};

#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub signal: Signal,
    pub optimal_entry: f64,
    pub max_wait_bars: u32,
    bars_waited: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOutcome {
    /// Still waiting, not yet touched or expired.
    Waiting,
    /// Price touched `optimal_entry`; execute at the original signal terms.
    Touched,
    /// `max_wait_bars` elapsed without a touch.
    Expired,
}

pub struct PendingEntryQueue {
    capacity: usize,
    entries: VecDeque<PendingEntry>,
}

impl PendingEntryQueue {
    pub fn new(capacity: usize) -> Self {
        PendingEntryQueue { capacity: capacity.max(1), entries: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers a signal to wait for `optimal_entry`. Re-registering the
    /// same signal id with identical terms is a no-op; with different
    /// terms it replaces the existing entry and resets its wait counter.
    /// The oldest entry is dropped when the queue is at capacity.
    pub fn push(&mut self, signal: Signal, optimal_entry: f64, max_wait_bars: u32) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.signal.id == signal.id) {
            if existing.optimal_entry == optimal_entry && existing.max_wait_bars == max_wait_bars {
                return;
            }
            existing.signal = signal;
            existing.optimal_entry = optimal_entry;
            existing.max_wait_bars = max_wait_bars;
            existing.bars_waited = 0;
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(PendingEntry { signal, optimal_entry, max_wait_bars, bars_waited: 0 });
    }

    /// Advances every pending entry by one bar and reports each one's
    /// outcome against `high`/`low` of the bar just closed. Touched and
    /// expired entries are removed from the queue.
    pub fn tick(&mut self, high: f64, low: f64) -> Vec<(PendingEntry, PendingOutcome)> {
        let mut results = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.entries.len());

        while let Some(mut entry) = self.entries.pop_front() {
            let touched = match entry.signal.side {
                Side::Long => low <= entry.optimal_entry,
                Side::Short => high >= entry.optimal_entry,
            };
            if touched {
                results.push((entry.clone(), PendingOutcome::Touched));
                continue;
            }
            entry.bars_waited += 1;
            if entry.bars_waited >= entry.max_wait_bars {
                results.push((entry.clone(), PendingOutcome::Expired));
                continue;
            }
            remaining.push_back(entry);
        }

        self.entries = remaining;
        results
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_schemas::Timeframe;
    use chrono::Utc;

    fn signal(id: uuid::Uuid, price: f64) -> Signal {
        Signal {
            id,
            ts_utc: Utc::now(),
            symbol: "X".into(),
            timeframe: Timeframe::M15,
            side: Side::Long,
            reference_price: price,
            proposed_sl: price - 5.0,
            proposed_tp: price + 10.0,
            confidence: 0.6,
            strategy: "test".into(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn touches_on_price_crossing_optimal_entry() {
        let mut q = PendingEntryQueue::new(10);
        let id = uuid::Uuid::new_v4();
        q.push(signal(id, 100.0), 99.0, 5);

        for _ in 0..3 {
            let out = q.tick(101.0, 100.0);
            assert!(out.is_empty());
        }
        let out = q.tick(100.5, 98.5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1, PendingOutcome::Touched);
        assert!(q.is_empty());
    }

    #[test]
    fn expires_after_max_wait_bars_without_touch() {
        let mut q = PendingEntryQueue::new(10);
        let id = uuid::Uuid::new_v4();
        q.push(signal(id, 100.0), 99.0, 3);

        assert!(q.tick(101.0, 100.5).is_empty());
        assert!(q.tick(101.0, 100.5).is_empty());
        let out = q.tick(101.0, 100.5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1, PendingOutcome::Expired);
    }

    #[test]
    fn reregistering_identical_terms_is_idempotent() {
        let mut q = PendingEntryQueue::new(10);
        let id = uuid::Uuid::new_v4();
        q.push(signal(id, 100.0), 99.0, 5);
        q.push(signal(id, 100.0), 99.0, 5);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn reregistering_different_terms_resets_wait_counter() {
        let mut q = PendingEntryQueue::new(10);
        let id = uuid::Uuid::new_v4();
        q.push(signal(id, 100.0), 99.0, 2);
        assert!(q.tick(101.0, 100.5).is_empty());
        q.push(signal(id, 100.0), 98.0, 5);
        // wait counter reset, so one more non-touching tick should not expire
        assert!(q.tick(101.0, 100.5).is_empty());
    }

    #[test]
    fn overflow_drops_oldest_entry() {
        let mut q = PendingEntryQueue::new(1);
        q.push(signal(uuid::Uuid::new_v4(), 100.0), 99.0, 5);
        q.push(signal(uuid::Uuid::new_v4(), 105.0), 104.0, 5);
        assert_eq!(q.len(), 1);
        assert_eq!(q.iter().next().unwrap().optimal_entry, 104.0);
    }
}
