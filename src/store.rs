//! `BarStore`: the bounded, time-ordered sliding window for one
//! (pair, interval) tuple. Single-writer, multi-reader in practice — a
//! strategy (or an on-demand fetch serialized with it) writes, consumers
//! read via [`BarStore::snapshot`].

use std::collections::VecDeque;

use crate::bar::Bar;
use crate::table::BarTable;

/// Bounded, time-ordered, gap-checkable window of bars for one
/// (pair, interval).
#[derive(Debug)]
pub struct BarStore {
    interval_seconds: i64,
    capacity: usize,
    bars: VecDeque<Bar>,
}

impl BarStore {
    /// Construct a store bound to `interval_seconds` and `capacity`. Both
    /// must be positive; this is a misuse-class invariant checked by the
    /// caller (the controller), not by this constructor.
    pub fn new(interval_seconds: i64, capacity: usize) -> Self {
        Self {
            interval_seconds,
            capacity,
            bars: VecDeque::with_capacity(capacity),
        }
    }

    pub fn interval_seconds(&self) -> i64 {
        self.interval_seconds
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Apply the insertion/replacement/no-op/eviction rules:
    /// - `open_time` not a multiple of the interval: rejected (returns `false`).
    /// - older than the oldest resident bar: no-op.
    /// - equal to an existing `open_time`: replaces that bar in place
    ///   (the newer message is authoritative).
    /// - otherwise: inserted in order; if now over capacity, the oldest is
    ///   evicted.
    ///
    /// Returns `true` if the bar was accepted (inserted or used to replace
    /// an existing slot), `false` if rejected for misalignment.
    pub fn offer(&mut self, bar: Bar) -> bool {
        if bar.open_time % self.interval_seconds != 0 {
            return false;
        }

        if let Some(oldest) = self.bars.front() {
            if bar.open_time < oldest.open_time {
                return true; // accepted by the rule, but the no-op is correct behavior
            }
        }

        match self.bars.binary_search_by_key(&bar.open_time, |b| b.open_time) {
            Ok(idx) => {
                self.bars[idx] = bar;
            }
            Err(idx) => {
                self.bars.insert(idx, bar);
                if self.bars.len() > self.capacity {
                    self.bars.pop_front();
                }
            }
        }
        true
    }

    /// A stable copy of the current sequence, ascending by `open_time`.
    pub fn snapshot(&self) -> Vec<Bar> {
        self.bars.iter().copied().collect()
    }

    /// Ten-column tabular projection of the current snapshot.
    pub fn as_table(&self) -> BarTable {
        BarTable::from_bars(&self.snapshot())
    }

    /// `true` iff consecutive open-times in `self` differ by exactly the
    /// interval duration. Vacuously `true` for 0 or 1 resident bars.
    pub fn sorted_and_equidistant(&self) -> bool {
        is_sorted_and_equidistant(&self.snapshot(), self.interval_seconds)
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn oldest(&self) -> Option<Bar> {
        self.bars.front().copied()
    }

    pub fn newest(&self) -> Option<Bar> {
        self.bars.back().copied()
    }
}

/// Check an external sequence of bars for the equidistance property
/// against an arbitrary interval, without requiring a `BarStore`.
pub fn is_sorted_and_equidistant(bars: &[Bar], interval_seconds: i64) -> bool {
    bars.windows(2)
        .all(|w| w[1].open_time - w[0].open_time == interval_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_at(t: i64) -> Bar {
        Bar::new(t, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1, 0.0, 0.0)
    }

    #[test]
    fn empty_and_singleton_are_equidistant() {
        let store = BarStore::new(60, 10);
        assert!(store.sorted_and_equidistant());

        let mut store = BarStore::new(60, 10);
        store.offer(bar_at(60));
        assert!(store.sorted_and_equidistant());
    }

    #[test]
    fn rejects_misaligned_open_time() {
        let mut store = BarStore::new(60, 10);
        assert!(!store.offer(bar_at(61)));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut store = BarStore::new(60, 3);
        for i in 0..5 {
            store.offer(bar_at(i * 60));
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.oldest().unwrap().open_time, 120);
        assert_eq!(store.newest().unwrap().open_time, 240);
    }

    #[test]
    fn replaces_existing_open_time_in_place() {
        let mut store = BarStore::new(60, 10);
        store.offer(bar_at(60));
        let mut updated = bar_at(60);
        updated.close = 99.0;
        store.offer(updated);
        assert_eq!(store.len(), 1);
        assert_eq!(store.newest().unwrap().close, 99.0);
    }

    #[test]
    fn offering_same_bar_twice_is_idempotent() {
        let mut store = BarStore::new(60, 10);
        let b = bar_at(60);
        store.offer(b);
        let snap1 = store.snapshot();
        store.offer(b);
        let snap2 = store.snapshot();
        assert_eq!(snap1, snap2);
    }

    #[test]
    fn older_than_oldest_with_room_is_a_no_op() {
        let mut store = BarStore::new(60, 10);
        store.offer(bar_at(120));
        store.offer(bar_at(180));
        let before = store.snapshot();
        store.offer(bar_at(60));
        let after = store.snapshot();
        assert_eq!(before, after);
    }

    #[test]
    fn out_of_order_delivery_from_two_sources_converges() {
        // REST backfill and the stream can interleave arbitrarily; final
        // state only depends on the set of (open_time, latest payload)
        // pairs seen.
        let mut store = BarStore::new(60, 10);
        store.offer(bar_at(180));
        store.offer(bar_at(60));
        store.offer(bar_at(120));
        assert!(store.sorted_and_equidistant());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let mut store = BarStore::new(60, 5);
        for i in 0..50 {
            store.offer(bar_at(i * 60));
        }
        assert!(store.len() <= 5);
    }
}
