//! Ordering tests for `TimeQueue` and its bin ring.

use super::{QueuePriority, TimeQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ev {
    tag: u32,
    prio: u8,
}

impl QueuePriority for Ev {
    fn priority(&self) -> u8 {
        self.prio
    }
}

fn ev(tag: u32) -> Ev {
    Ev { tag, prio: 0 }
}

fn drain(q: &mut TimeQueue<Ev>) -> Vec<(f64, u32)> {
    let mut out = Vec::new();
    while let Some((t, e)) = q.atomic_dequeue(f64::INFINITY) {
        out.push((t, e.tag));
    }
    out
}

/// SplitMix64, enough for a reproducible operation mix.
struct Mix(u64);

impl Mix {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

// ── Exact path ────────────────────────────────────────────────────────

#[test]
fn test_time_ordering() {
    let mut q = TimeQueue::new();
    q.insert(30.0, ev(3));
    q.insert(10.0, ev(1));
    q.insert(20.0, ev(2));
    assert_eq!(q.least_time(), 10.0);
    assert_eq!(drain(&mut q), vec![(10.0, 1), (20.0, 2), (30.0, 3)]);
    assert!(q.is_empty());
    assert_eq!(q.least_time(), f64::INFINITY);
}

#[test]
fn test_fifo_at_same_time() {
    let mut q = TimeQueue::new();
    for tag in 0..5 {
        q.insert(7.5, ev(tag));
    }
    let tags: Vec<u32> = drain(&mut q).into_iter().map(|(_, t)| t).collect();
    assert_eq!(tags, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_priority_breaks_ties() {
    let mut q = TimeQueue::new();
    q.insert(5.0, Ev { tag: 1, prio: 6 });
    q.insert(5.0, Ev { tag: 2, prio: 0 });
    q.insert(4.0, Ev { tag: 3, prio: 6 });
    q.insert(5.0, Ev { tag: 4, prio: 3 });
    let tags: Vec<u32> = drain(&mut q).into_iter().map(|(_, t)| t).collect();
    assert_eq!(tags, vec![3, 2, 4, 1]);
}

#[test]
fn test_atomic_dequeue_respects_limit() {
    let mut q = TimeQueue::new();
    q.insert(2.0, ev(1));
    q.insert(3.0, ev(2));
    assert_eq!(q.atomic_dequeue(1.999), None);
    assert_eq!(q.len(), 2);
    assert_eq!(q.atomic_dequeue(2.0).map(|(t, e)| (t, e.tag)), Some((2.0, 1)));
    assert_eq!(q.atomic_dequeue(2.5), None);
    assert_eq!(q.least_time(), 3.0);
}

#[test]
fn test_remove_least_promotes_next() {
    let mut q = TimeQueue::new();
    let a = q.insert(1.0, ev(1));
    q.insert(2.0, ev(2));
    q.insert(3.0, ev(3));
    assert_eq!(q.least(), Some(a));
    assert_eq!(q.remove(a).map(|(t, e)| (t, e.tag)), Some((1.0, 1)));
    assert_eq!(q.least_time(), 2.0);
    // Removing twice is a no-op.
    assert_eq!(q.remove(a), None);
    assert_eq!(q.len(), 2);
}

#[test]
fn test_remove_from_middle() {
    let mut q = TimeQueue::new();
    q.insert(1.0, ev(1));
    let b = q.insert(2.0, ev(2));
    q.insert(3.0, ev(3));
    q.remove(b);
    assert_eq!(drain(&mut q), vec![(1.0, 1), (3.0, 3)]);
}

#[test]
fn test_move_earlier_and_later() {
    let mut q = TimeQueue::new();
    let a = q.insert(5.0, ev(1));
    let b = q.insert(6.0, ev(2));
    assert!(q.move_to(b, 1.0));
    assert_eq!(q.least(), Some(b));
    assert!(q.move_to(b, 9.0));
    assert_eq!(q.least(), Some(a));
    assert_eq!(q.get(b).map(|(t, _)| t), Some(9.0));
    assert_eq!(drain(&mut q), vec![(5.0, 1), (9.0, 2)]);
    assert!(!q.move_to(b, 1.0));
}

#[test]
fn test_move_goes_behind_equal_keys() {
    let mut q = TimeQueue::new();
    let a = q.insert(4.0, ev(1));
    q.insert(4.0, ev(2));
    q.move_to(a, 4.0);
    let tags: Vec<u32> = drain(&mut q).into_iter().map(|(_, t)| t).collect();
    assert_eq!(tags, vec![2, 1]);
}

#[test]
fn test_stale_handle_does_not_alias_new_item() {
    let mut q = TimeQueue::new();
    let a = q.insert(1.0, ev(1));
    q.atomic_dequeue(1.0);
    let b = q.insert(2.0, ev(2));
    assert!(!q.contains(a));
    assert!(!q.move_to(a, 0.5));
    assert_eq!(q.remove(a), None);
    assert_eq!(q.get(b).map(|(t, e)| (t, e.tag)), Some((2.0, 2)));
}

#[test]
fn test_dequeue_monotone_under_interleaving() {
    let mut rng = Mix(42);
    let mut q = TimeQueue::new();
    let mut live = Vec::new();
    let mut limit = 0.0;
    let mut last = f64::NEG_INFINITY;
    for step in 0..4000u32 {
        match rng.below(10) {
            0..=4 => {
                let t = limit + rng.below(1000) as f64 / 10.0;
                live.push(q.insert(t, ev(step)));
            }
            5 => {
                if !live.is_empty() {
                    let i = rng.below(live.len() as u64) as usize;
                    q.remove(live.swap_remove(i));
                }
            }
            6 => {
                if !live.is_empty() {
                    let i = rng.below(live.len() as u64) as usize;
                    let t = limit + rng.below(1000) as f64 / 10.0;
                    q.move_to(live[i], t);
                }
            }
            _ => {
                limit += rng.below(30) as f64 / 10.0;
                while let Some((t, _)) = q.atomic_dequeue(limit) {
                    assert!(t >= last, "dequeued {t} after {last}");
                    assert!(t <= limit);
                    last = t;
                }
                assert!(q.least_time() > limit);
            }
        }
    }
    let rest = drain(&mut q);
    for w in rest.windows(2) {
        assert!(w[0].0 <= w[1].0);
    }
}

#[test]
fn test_iter_ordered_matches_drain() {
    let mut q = TimeQueue::new();
    for (i, t) in [4.0, 1.0, 3.0, 1.0, 2.0].into_iter().enumerate() {
        q.insert(t, ev(i as u32));
    }
    let listed: Vec<(f64, u32)> = q.iter_ordered().into_iter().map(|(_, t, e)| (t, e.tag)).collect();
    assert_eq!(listed, drain(&mut q));
}

// ── Bin ring ──────────────────────────────────────────────────────────

#[test]
fn test_enqueue_bin_within_horizon() {
    let mut q = TimeQueue::with_bins(8);
    q.init_bins(0.5, -0.25);
    let (h, binned) = q.enqueue_bin(1.1, ev(1));
    assert!(binned);
    assert!(q.contains(h));
    assert_eq!(q.binned_len(), 1);
    // Not on the exact path.
    assert_eq!(q.least_time(), f64::INFINITY);
    // Bin 0 covers [-0.25, 0.25), bin 2 covers [0.75, 1.25).
    assert!(q.bin_top().is_none());
    q.shift_bin(0.25);
    assert!(q.bin_top().is_none());
    q.shift_bin(0.75);
    assert_eq!(q.bin_top(), Some(h));
    assert_eq!(q.dequeue_bin().map(|(t, e)| (t, e.tag)), Some((1.1, 1)));
    assert!(q.is_empty());
}

#[test]
fn test_enqueue_bin_beyond_horizon_falls_back() {
    let mut q = TimeQueue::with_bins(4);
    q.init_bins(1.0, -0.5);
    let (_, binned) = q.enqueue_bin(3.4, ev(1));
    assert!(binned);
    let (h, binned) = q.enqueue_bin(3.6, ev(2));
    assert!(!binned);
    assert_eq!(q.least(), Some(h));
    assert_eq!(q.least_time(), 3.6);
}

#[test]
fn test_enqueue_bin_without_ring_is_exact() {
    let mut q = TimeQueue::new();
    let (h, binned) = q.enqueue_bin(2.0, ev(1));
    assert!(!binned);
    assert_eq!(q.least(), Some(h));
}

#[test]
fn test_shift_rehomes_leftovers() {
    let mut q = TimeQueue::with_bins(4);
    q.init_bins(1.0, 0.0);
    q.enqueue_bin(0.5, ev(1));
    // Retire bin 0 without draining it.
    q.shift_bin(1.0);
    assert_eq!(q.binned_len(), 0);
    assert_eq!(q.least_time(), 0.5);
}

#[test]
fn test_move_binned_item_goes_exact() {
    let mut q = TimeQueue::with_bins(4);
    q.init_bins(1.0, 0.0);
    let (h, _) = q.enqueue_bin(2.5, ev(1));
    assert!(q.move_to(h, 0.75));
    assert_eq!(q.binned_len(), 0);
    assert_eq!(q.least(), Some(h));
}
