//! Fixed-width time bins for the fixed-step fast path.
//!
//! A ring of `nbins` slots, each `dt` wide, starting at base time `tt`.
//! Slot `qpt` is the one that will be drained at the next step; every
//! [`BinQueue::shift`] advances the ring by one slot and the base time to
//! the new half-step boundary. An event whose slot would fall outside the
//! ring is not binned; the caller inserts it on the exact path instead.

use std::collections::VecDeque;

use crate::pool::PoolKey;

/// Rounding slack when computing a slot, so times that sit exactly on a
/// boundary land in the later slot despite float error.
const SLOT_EPS: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct BinQueue {
    bins: Vec<VecDeque<PoolKey>>,
    qpt: usize,
    tt: f64,
    dt: f64,
    nshift: u64,
    count: usize,
}

impl BinQueue {
    pub fn new(nbins: usize) -> Self {
        BinQueue {
            bins: vec![VecDeque::new(); nbins.max(1)],
            qpt: 0,
            tt: 0.0,
            dt: 1.0,
            nshift: 0,
            count: 0,
        }
    }

    /// Reset the ring to start at `t` with slots `dt` wide.
    ///
    /// Any keys still binned are returned so the owner can re-home them.
    pub fn init(&mut self, dt: f64, t: f64) -> Vec<PoolKey> {
        let mut leftover = Vec::with_capacity(self.count);
        for bin in &mut self.bins {
            leftover.extend(bin.drain(..));
        }
        self.dt = dt;
        self.tt = t;
        self.qpt = 0;
        self.nshift = 0;
        self.count = 0;
        leftover
    }

    /// Ring slot for delivery time `t`, or `None` if `t` is before the base
    /// time or beyond the horizon.
    pub fn slot_for(&self, t: f64) -> Option<usize> {
        let x = (t - self.tt) / self.dt + SLOT_EPS;
        if !(x >= 0.0) {
            return None;
        }
        let idt = x as usize;
        if idt >= self.bins.len() {
            return None;
        }
        Some((self.qpt + idt) % self.bins.len())
    }

    pub fn push(&mut self, slot: usize, key: PoolKey) {
        self.bins[slot].push_back(key);
        self.count += 1;
    }

    /// Remove `key` from `slot`; returns whether it was there.
    pub fn remove(&mut self, slot: usize, key: PoolKey) -> bool {
        let bin = &mut self.bins[slot];
        match bin.iter().position(|k| *k == key) {
            Some(pos) => {
                bin.remove(pos);
                self.count -= 1;
                true
            }
            None => false,
        }
    }

    /// Front of the current slot.
    pub fn top(&self) -> Option<PoolKey> {
        self.bins[self.qpt].front().copied()
    }

    /// Pop the front of the current slot.
    pub fn pop_current(&mut self) -> Option<PoolKey> {
        let key = self.bins[self.qpt].pop_front()?;
        self.count -= 1;
        Some(key)
    }

    /// Advance the ring one slot; the new base time is `t`.
    ///
    /// Keys left in the slot being retired are returned.
    pub fn shift(&mut self, t: f64) -> Vec<PoolKey> {
        let leftover: Vec<PoolKey> = self.bins[self.qpt].drain(..).collect();
        self.count -= leftover.len();
        self.tt = t;
        self.qpt = (self.qpt + 1) % self.bins.len();
        self.nshift += 1;
        leftover
    }

    /// Keys in ring order, starting from the current slot.
    pub fn keys_in_order(&self) -> impl Iterator<Item = PoolKey> + '_ {
        let n = self.bins.len();
        (0..n).flat_map(move |i| self.bins[(self.qpt + i) % n].iter().copied())
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn nbins(&self) -> usize {
        self.bins.len()
    }

    pub fn base_time(&self) -> f64 {
        self.tt
    }

    pub fn width(&self) -> f64 {
        self.dt
    }

    /// Number of shifts since the last init.
    pub fn shifts(&self) -> u64 {
        self.nshift
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Pool;

    #[test]
    fn test_slot_rounding() {
        let mut bq = BinQueue::new(10);
        bq.init(0.25, -0.125);
        assert_eq!(bq.slot_for(-0.125), Some(0));
        assert_eq!(bq.slot_for(0.1), Some(0));
        assert_eq!(bq.slot_for(0.125), Some(1));
        assert_eq!(bq.slot_for(2.3), Some(9));
        assert_eq!(bq.slot_for(2.4), None);
        assert_eq!(bq.slot_for(-1.0), None);
    }

    #[test]
    fn test_shift_moves_ring() {
        let mut pool = Pool::new(4);
        let mut bq = BinQueue::new(3);
        bq.init(1.0, 0.0);
        let k = pool.alloc(());
        let slot = bq.slot_for(1.5).unwrap();
        bq.push(slot, k);
        assert!(bq.top().is_none());
        assert!(bq.shift(1.0).is_empty());
        assert_eq!(bq.top(), Some(k));
        assert_eq!(bq.pop_current(), Some(k));
        assert!(bq.is_empty());
        assert_eq!(bq.shifts(), 1);
    }

    #[test]
    fn test_remove_from_slot() {
        let mut pool = Pool::new(4);
        let mut bq = BinQueue::new(4);
        bq.init(1.0, 0.0);
        let a = pool.alloc(());
        let b = pool.alloc(());
        bq.push(0, a);
        bq.push(0, b);
        assert!(bq.remove(0, a));
        assert!(!bq.remove(0, a));
        assert_eq!(bq.len(), 1);
        assert_eq!(bq.pop_current(), Some(b));
    }
}
