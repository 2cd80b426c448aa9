//! Generational free-list allocator.
//!
//! Self events are created and destroyed at the highest rate of any event
//! kind, and queue items churn with every send. Both live in a [`Pool`]:
//! slots are recycled through a free list, and every slot carries a
//! generation counter so a stale [`PoolKey`] (one whose slot was freed and
//! reused) is detected instead of silently aliasing the new occupant.

/// Handle to a slot in a [`Pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolKey {
    index: u32,
    generation: u32,
}

impl PoolKey {
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}g{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Fixed-block allocator with generation-checked handles.
///
/// Storage grows in blocks of `block` slots when the free list runs dry;
/// it never shrinks until [`Pool::clear`].
#[derive(Debug, Clone)]
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    block: usize,
    live: usize,
    peak: usize,
    grows: usize,
}

impl<T> Pool<T> {
    /// Create a pool that grows `block` slots at a time.
    pub fn new(block: usize) -> Self {
        Pool {
            slots: Vec::new(),
            free: Vec::new(),
            block: block.max(1),
            live: 0,
            peak: 0,
            grows: 0,
        }
    }

    /// Add a block of slots; returns the first new index, the rest go to
    /// the free list.
    fn grow(&mut self) -> u32 {
        let start = self.slots.len();
        self.slots.reserve(self.block);
        for _ in 0..self.block {
            self.slots.push(Slot {
                generation: 0,
                value: None,
            });
        }
        // Reverse so lower indices are handed out first.
        self.free
            .extend((start + 1..start + self.block).rev().map(|i| i as u32));
        self.grows += 1;
        start as u32
    }

    /// Store `value` and return its handle.
    pub fn alloc(&mut self, value: T) -> PoolKey {
        let index = match self.free.pop() {
            Some(i) => i,
            None => self.grow(),
        };
        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        self.live += 1;
        self.peak = self.peak.max(self.live);
        PoolKey {
            index,
            generation: slot.generation,
        }
    }

    /// Release the slot and return its value. A stale key returns `None`.
    pub fn free(&mut self, key: PoolKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.live -= 1;
        Some(value)
    }

    pub fn get(&self, key: PoolKey) -> Option<&T> {
        let slot = self.slots.get(key.index())?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, key: PoolKey) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Whether `key` still names a live value.
    pub fn contains(&self, key: PoolKey) -> bool {
        self.get(key).is_some()
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Total slots ever allocated.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// High-water mark of live values since the last clear.
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Number of block allocations performed.
    pub fn grow_count(&self) -> usize {
        self.grows
    }

    /// Drop every value. Outstanding keys become stale.
    pub fn clear(&mut self) {
        self.free.clear();
        for (i, slot) in self.slots.iter_mut().enumerate().rev() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(i as u32);
        }
        self.live = 0;
        self.peak = 0;
    }

    /// Iterate live `(key, value)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (PoolKey, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value.as_ref().map(|v| {
                (
                    PoolKey {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    v,
                )
            })
        })
    }
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Pool::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_get_free() {
        let mut pool = Pool::new(4);
        let a = pool.alloc("a");
        let b = pool.alloc("b");
        assert_eq!(pool.get(a), Some(&"a"));
        assert_eq!(pool.get(b), Some(&"b"));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.free(a), Some("a"));
        assert_eq!(pool.len(), 1);
        assert!(!pool.contains(a));
    }

    #[test]
    fn test_stale_key_after_reuse() {
        let mut pool = Pool::new(1);
        let a = pool.alloc(1);
        pool.free(a);
        let b = pool.alloc(2);
        // Same slot, new generation.
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert_eq!(pool.get(a), None);
        assert_eq!(pool.free(a), None);
        assert_eq!(pool.get(b), Some(&2));
    }

    #[test]
    fn test_double_free_is_rejected() {
        let mut pool = Pool::new(2);
        let a = pool.alloc(10);
        assert_eq!(pool.free(a), Some(10));
        assert_eq!(pool.free(a), None);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_grows_in_blocks() {
        let mut pool = Pool::new(3);
        let keys: Vec<_> = (0..7).map(|i| pool.alloc(i)).collect();
        assert_eq!(pool.capacity(), 9);
        assert_eq!(pool.grow_count(), 3);
        assert_eq!(pool.peak(), 7);
        for k in keys {
            pool.free(k);
        }
        assert!(pool.is_empty());
        // No further growth while recycling.
        for i in 0..9 {
            pool.alloc(i);
        }
        assert_eq!(pool.grow_count(), 3);
    }

    #[test]
    fn test_clear_invalidates_keys() {
        let mut pool = Pool::new(4);
        let a = pool.alloc('x');
        pool.clear();
        assert!(!pool.contains(a));
        let b = pool.alloc('y');
        assert_eq!(pool.get(b), Some(&'y'));
        assert_eq!(pool.iter().count(), 1);
    }
}
