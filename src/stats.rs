//! Delivery statistics.
//!
//! Each thread context owns a [`SchedulerStats`] and passes it by
//! reference into send/deliver code. The scheduler resets every thread's
//! copy at `init` and merges them on demand.

use crate::event::EventKind;

/// One counter per [`EventKind`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct KindCounts([u64; EventKind::COUNT]);

impl KindCounts {
    #[inline]
    pub fn bump(&mut self, kind: EventKind) {
        self.0[kind.index()] += 1;
    }

    #[inline]
    pub fn get(&self, kind: EventKind) -> u64 {
        self.0[kind.index()]
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    fn merge(&mut self, other: &KindCounts) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a += b;
        }
    }
}

/// Counters collected while scheduling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerStats {
    /// Occurrences queued, by kind.
    pub sent: KindCounts,
    /// Occurrences delivered, by kind.
    pub delivered: KindCounts,
    /// Queued threshold crossings removed after a retreat.
    pub abandoned: u64,
    /// Crossings sent at once because the integrator was freshly initialized.
    pub immediate_crossings: u64,
    /// Threshold sources that fired.
    pub spikes: u64,
    pub moved: u64,
    pub cancelled: u64,
    /// Sends routed through another thread's mailbox.
    pub cross_thread: u64,
    pub binned: u64,
    /// Sends that missed the bin ring and took the exact path.
    pub exact: u64,
    /// Sends to an inactive or disconnected connection.
    pub detached: u64,
    pub steps: u64,
    pub interpolations: u64,
    pub inits: u64,
    pub barrier_rounds: u64,
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Add `other`'s counters into `self`.
    pub fn merge(&mut self, other: &SchedulerStats) {
        self.sent.merge(&other.sent);
        self.delivered.merge(&other.delivered);
        self.abandoned += other.abandoned;
        self.immediate_crossings += other.immediate_crossings;
        self.spikes += other.spikes;
        self.moved += other.moved;
        self.cancelled += other.cancelled;
        self.cross_thread += other.cross_thread;
        self.binned += other.binned;
        self.exact += other.exact;
        self.detached += other.detached;
        self.steps += other.steps;
        self.interpolations += other.interpolations;
        self.inits += other.inits;
        self.barrier_rounds += other.barrier_rounds;
    }
}

impl std::fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:<12} {:>10} {:>10}", "kind", "sent", "delivered")?;
        for kind in EventKind::ALL {
            writeln!(
                f,
                "{:<12} {:>10} {:>10}",
                kind.name(),
                self.sent.get(kind),
                self.delivered.get(kind)
            )?;
        }
        writeln!(f, "spikes {}  abandoned {}  immediate {}", self.spikes, self.abandoned, self.immediate_crossings)?;
        writeln!(f, "moved {}  cancelled {}  cross-thread {}", self.moved, self.cancelled, self.cross_thread)?;
        writeln!(f, "binned {}  exact {}  detached {}", self.binned, self.exact, self.detached)?;
        write!(
            f,
            "steps {}  interpolations {}  inits {}  barrier rounds {}",
            self.steps, self.interpolations, self.inits, self.barrier_rounds
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_and_merge() {
        let mut a = SchedulerStats::new();
        a.sent.bump(EventKind::Connection);
        a.sent.bump(EventKind::Connection);
        a.abandoned = 1;
        let mut b = SchedulerStats::new();
        b.sent.bump(EventKind::Barrier);
        b.abandoned = 2;
        a.merge(&b);
        assert_eq!(a.sent.get(EventKind::Connection), 2);
        assert_eq!(a.sent.get(EventKind::Barrier), 1);
        assert_eq!(a.sent.total(), 3);
        assert_eq!(a.abandoned, 3);
    }

    #[test]
    fn test_reset() {
        let mut a = SchedulerStats::new();
        a.delivered.bump(EventKind::Watch);
        a.steps = 9;
        a.reset();
        assert_eq!(a, SchedulerStats::default());
    }

    #[test]
    fn test_display_lists_every_kind() {
        let s = SchedulerStats::new().to_string();
        for kind in EventKind::ALL {
            assert!(s.contains(kind.name()));
        }
    }
}
