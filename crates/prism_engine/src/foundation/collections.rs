//! Specialized collection types

pub use slotmap::{SlotMap, DefaultKey};

/// Handle-based map using slot map for stable references
pub type HandleMap<T> = SlotMap<DefaultKey, T>;

/// Fixed-capacity slot pool for acquire/release style resources
///
/// Slots are addressed by index; a released index may be handed out again by
/// a later acquire, and an index is only valid between its acquire and
/// release. The pool never grows past the capacity given at construction.
pub struct SlotPool<T> {
    slots: Vec<Option<T>>,
    free_indices: Vec<usize>,
    capacity: usize,
}

impl<T> SlotPool<T> {
    /// Create a pool that can hold at most `capacity` live values
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_indices: Vec::new(),
            capacity,
        }
    }

    /// Place `value` into a free slot and return its index
    ///
    /// Released slots are reused before new ones are opened. Returns `None`
    /// when all `capacity` slots are live.
    pub fn acquire(&mut self, value: T) -> Option<usize> {
        if let Some(index) = self.free_indices.pop() {
            self.slots[index] = Some(value);
            return Some(index);
        }
        if self.slots.len() >= self.capacity {
            return None;
        }
        let index = self.slots.len();
        self.slots.push(Some(value));
        Some(index)
    }

    /// Like [`Self::acquire`], but builds the value from the index it will occupy
    pub fn acquire_with(&mut self, build: impl FnOnce(usize) -> T) -> Option<usize> {
        if let Some(index) = self.free_indices.pop() {
            self.slots[index] = Some(build(index));
            return Some(index);
        }
        if self.slots.len() >= self.capacity {
            return None;
        }
        let index = self.slots.len();
        self.slots.push(Some(build(index)));
        Some(index)
    }

    /// Free the slot at `index`, returning its value
    ///
    /// Returns `None` if the slot is out of range or already free.
    pub fn release(&mut self, index: usize) -> Option<T> {
        let value = self.slots.get_mut(index)?.take()?;
        self.free_indices.push(index);
        Some(value)
    }

    /// Get the value at `index`, if live
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.as_ref()
    }

    /// Get the value at `index` mutably, if live
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.slots.len() - self.free_indices.len()
    }

    /// Whether no values are live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of simultaneously live values
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the pool has no free slot left
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Iterate over live values with their indices
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (i, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_fills_up_to_capacity() {
        let mut pool = SlotPool::with_capacity(2);
        assert_eq!(pool.acquire("a"), Some(0));
        assert_eq!(pool.acquire("b"), Some(1));
        assert_eq!(pool.acquire("c"), None);
        assert!(pool.is_full());
    }

    #[test]
    fn test_release_makes_slot_reusable() {
        let mut pool = SlotPool::with_capacity(2);
        let a = pool.acquire(10).unwrap();
        let _b = pool.acquire(20).unwrap();

        assert_eq!(pool.release(a), Some(10));
        assert!(!pool.is_full());

        // The freed index comes back before any new slot would open.
        assert_eq!(pool.acquire(30), Some(a));
        assert_eq!(pool.get(a), Some(&30));
    }

    #[test]
    fn test_release_of_free_slot_returns_none() {
        let mut pool: SlotPool<u32> = SlotPool::with_capacity(4);
        let id = pool.acquire(1).unwrap();
        assert_eq!(pool.release(id), Some(1));
        assert_eq!(pool.release(id), None);
        assert_eq!(pool.release(99), None);
    }

    #[test]
    fn test_cycling_never_exceeds_capacity() {
        // More acquire/release cycles than capacity, never more than
        // `capacity` live at once: every acquire must succeed.
        let capacity = 4;
        let mut pool = SlotPool::with_capacity(capacity);
        let mut live = Vec::new();

        for round in 0..capacity * 3 {
            let id = pool.acquire(round).unwrap();
            live.push(id);
            assert!(pool.len() <= capacity);

            if live.len() == capacity {
                for id in live.drain(..) {
                    assert!(pool.release(id).is_some());
                }
            }
        }
        assert!(pool.len() <= capacity);
    }

    #[test]
    fn test_iter_skips_released_slots() {
        let mut pool = SlotPool::with_capacity(3);
        let a = pool.acquire("a").unwrap();
        let b = pool.acquire("b").unwrap();
        pool.release(a);

        let live: Vec<_> = pool.iter().collect();
        assert_eq!(live, vec![(b, &"b")]);
    }
}
