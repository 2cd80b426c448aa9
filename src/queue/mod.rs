//! Time-ordered event queue.
//!
//! [`TimeQueue`] orders items by `(time, priority, sequence)`:
//!
//! - `time` is the delivery time,
//! - `priority` is the fixed same-time rank of the payload's kind,
//! - `sequence` is a per-queue counter, so same-time same-kind items come
//!   out in insertion order.
//!
//! The current minimum is cached outside the ordered index, which makes
//! `least`/`least_time` O(1) and makes the common "insert something later
//! than the head, then pop the head" pattern avoid tree rebalancing.
//!
//! The queue is a weak index: it owns only the `(time, payload)` pair,
//! never the object the payload names. An optional [`BinQueue`] gives the
//! fixed-step path an O(1) insert for near-future items.

pub mod bin;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use crate::pool::{Pool, PoolKey};
use crate::time::SimTime;

pub use bin::BinQueue;

/// Same-time rank of a queued payload. Lower ranks are delivered first.
pub trait QueuePriority {
    fn priority(&self) -> u8;
}

impl QueuePriority for usize {
    fn priority(&self) -> u8 {
        0
    }
}

/// Stable handle to a queued item. Stays valid across [`TimeQueue::move_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle(PoolKey);

impl std::fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "q{}", self.0)
    }
}

type ItemKey = (SimTime, u8, u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Place {
    Least,
    Tree,
    Bin(usize),
}

#[derive(Debug, Clone)]
struct Item<E> {
    key: ItemKey,
    data: E,
    place: Place,
}

/// Priority queue keyed by delivery time.
#[derive(Debug, Clone)]
pub struct TimeQueue<E> {
    items: Pool<Item<E>>,
    tree: BTreeMap<ItemKey, PoolKey>,
    least: Option<PoolKey>,
    seq: u64,
    bins: Option<BinQueue>,
}

impl<E: QueuePriority> TimeQueue<E> {
    /// Create an empty queue without bins.
    pub fn new() -> Self {
        TimeQueue {
            items: Pool::new(256),
            tree: BTreeMap::new(),
            least: None,
            seq: 0,
            bins: None,
        }
    }

    /// Create an empty queue with a ring of `nbins` bins.
    ///
    /// The ring is inert until [`TimeQueue::init_bins`] sets its width.
    pub fn with_bins(nbins: usize) -> Self {
        let mut q = Self::new();
        q.bins = Some(BinQueue::new(nbins));
        q
    }

    fn next_key(&mut self, time: f64, data: &E) -> ItemKey {
        let key = (SimTime::new(time), data.priority(), self.seq);
        self.seq += 1;
        key
    }

    /// Put an allocated item on the exact-ordering path.
    fn link(&mut self, pk: PoolKey) {
        let Some(key) = self.items.get(pk).map(|it| it.key) else {
            return;
        };
        let place = match self.least.and_then(|l| self.items.get(l)).map(|it| it.key) {
            None => {
                self.least = Some(pk);
                Place::Least
            }
            Some(least_key) if key < least_key => {
                if let Some(old) = self.least.replace(pk) {
                    self.tree.insert(least_key, old);
                    if let Some(it) = self.items.get_mut(old) {
                        it.place = Place::Tree;
                    }
                }
                Place::Least
            }
            Some(_) => {
                self.tree.insert(key, pk);
                Place::Tree
            }
        };
        if let Some(it) = self.items.get_mut(pk) {
            it.place = place;
        }
    }

    /// Detach an item from whichever structure holds it, keeping its slot.
    fn unlink(&mut self, pk: PoolKey) -> bool {
        let Some((key, place)) = self.items.get(pk).map(|it| (it.key, it.place)) else {
            return false;
        };
        match place {
            Place::Least => {
                self.least = None;
                if let Some((_, next)) = self.tree.pop_first() {
                    self.least = Some(next);
                    if let Some(it) = self.items.get_mut(next) {
                        it.place = Place::Least;
                    }
                }
            }
            Place::Tree => {
                self.tree.remove(&key);
            }
            Place::Bin(slot) => {
                if let Some(bins) = self.bins.as_mut() {
                    bins.remove(slot, pk);
                }
            }
        }
        true
    }

    /// Queue `data` for delivery at `time`.
    pub fn insert(&mut self, time: f64, data: E) -> QueueHandle {
        let key = self.next_key(time, &data);
        let pk = self.items.alloc(Item {
            key,
            data,
            place: Place::Tree,
        });
        self.link(pk);
        QueueHandle(pk)
    }

    /// Remove a queued item. Returns `None` for a handle that is no longer
    /// queued.
    pub fn remove(&mut self, handle: QueueHandle) -> Option<(f64, E)> {
        if !self.unlink(handle.0) {
            return None;
        }
        let item = self.items.free(handle.0)?;
        Some((item.key.0.value(), item.data))
    }

    /// Reschedule a queued item to `time`.
    ///
    /// The item is ordered after every same-time same-priority item already
    /// queued. Binned items move onto the exact path. Returns `false` for a
    /// handle that is no longer queued.
    pub fn move_to(&mut self, handle: QueueHandle, time: f64) -> bool {
        if !self.unlink(handle.0) {
            return false;
        }
        let seq = self.seq;
        self.seq += 1;
        if let Some(it) = self.items.get_mut(handle.0) {
            it.key = (SimTime::new(time), it.key.1, seq);
        }
        self.link(handle.0);
        true
    }

    /// Handle of the exact-path minimum.
    pub fn least(&self) -> Option<QueueHandle> {
        self.least.map(QueueHandle)
    }

    /// Time of the exact-path minimum, `f64::INFINITY` when empty.
    pub fn least_time(&self) -> f64 {
        self.least
            .and_then(|l| self.items.get(l))
            .map_or(f64::INFINITY, |it| it.key.0.value())
    }

    /// Peek at the exact-path minimum.
    pub fn peek(&self) -> Option<(f64, &E)> {
        let it = self.items.get(self.least?)?;
        Some((it.key.0.value(), &it.data))
    }

    /// Look up a queued item.
    pub fn get(&self, handle: QueueHandle) -> Option<(f64, &E)> {
        self.items
            .get(handle.0)
            .map(|it| (it.key.0.value(), &it.data))
    }

    pub fn contains(&self, handle: QueueHandle) -> bool {
        self.items.contains(handle.0)
    }

    /// Pop the minimum only if its time is `<= limit`.
    pub fn atomic_dequeue(&mut self, limit: f64) -> Option<(f64, E)> {
        let least = self.least?;
        if self.least_time() > limit {
            return None;
        }
        self.remove(QueueHandle(least))
    }

    /// Total queued items, binned ones included.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every item. All handles become stale.
    pub fn clear(&mut self) {
        self.items.clear();
        self.tree.clear();
        self.least = None;
        if let Some(bins) = self.bins.as_mut() {
            let (dt, tt) = (bins.width(), bins.base_time());
            bins.init(dt, tt);
        }
    }

    /// All items as `(handle, time, data)`: exact path in delivery order,
    /// then binned items in ring order.
    pub fn iter_ordered(&self) -> Vec<(QueueHandle, f64, &E)> {
        let mut out = Vec::with_capacity(self.len());
        let exact = self.least.into_iter().chain(self.tree.values().copied());
        let binned = self
            .bins
            .iter()
            .flat_map(|b| b.keys_in_order())
            .collect::<Vec<_>>();
        for pk in exact.chain(binned) {
            if let Some(it) = self.items.get(pk) {
                out.push((QueueHandle(pk), it.key.0.value(), &it.data));
            }
        }
        out
    }

    // ── Binned path ───────────────────────────────────────────────

    /// Whether a bin ring is attached.
    pub fn has_bins(&self) -> bool {
        self.bins.is_some()
    }

    /// Reset the bin ring to width `dt` starting at `t`.
    pub fn init_bins(&mut self, dt: f64, t: f64) {
        let leftover = match self.bins.as_mut() {
            Some(bins) => bins.init(dt, t),
            None => return,
        };
        for pk in leftover {
            self.link(pk);
        }
    }

    /// Queue `data` in the bin covering `time`.
    ///
    /// Falls back to [`TimeQueue::insert`] when no ring is attached or the
    /// time is outside it. The second value tells whether the item was
    /// binned.
    pub fn enqueue_bin(&mut self, time: f64, data: E) -> (QueueHandle, bool) {
        let slot = self.bins.as_ref().and_then(|b| b.slot_for(time));
        let Some(slot) = slot else {
            return (self.insert(time, data), false);
        };
        let key = self.next_key(time, &data);
        let pk = self.items.alloc(Item {
            key,
            data,
            place: Place::Bin(slot),
        });
        if let Some(bins) = self.bins.as_mut() {
            bins.push(slot, pk);
        }
        (QueueHandle(pk), true)
    }

    /// Whether the current bin holds anything.
    pub fn bin_top(&self) -> Option<QueueHandle> {
        self.bins.as_ref()?.top().map(QueueHandle)
    }

    /// Pop from the current bin.
    pub fn dequeue_bin(&mut self) -> Option<(f64, E)> {
        let pk = self.bins.as_mut()?.pop_current()?;
        let item = self.items.free(pk)?;
        Some((item.key.0.value(), item.data))
    }

    /// Retire the current bin and make the next one current, with base time
    /// `t`. Anything left in the retired bin moves to the exact path.
    pub fn shift_bin(&mut self, t: f64) {
        let leftover = match self.bins.as_mut() {
            Some(bins) => bins.shift(t),
            None => return,
        };
        for pk in leftover {
            self.link(pk);
        }
    }

    /// Number of binned items.
    pub fn binned_len(&self) -> usize {
        self.bins.as_ref().map_or(0, |b| b.len())
    }
}

impl<E: QueuePriority> Default for TimeQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}
