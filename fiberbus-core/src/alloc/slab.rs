//! ## fiberbus-core::alloc::slab
//! **Fixed-capacity node slab**
//!
//! All slots are allocated up front; allocation and release only move an
//! index on and off a pre-sized free list, so both are O(1) and never touch
//! the heap. The slab carries no locking of its own: the owner decides how
//! access is serialized (the event queue uses a critical section).

/// Fixed-capacity storage addressed by slot index.
pub struct NodeSlab<T> {
    slots: Box<[Option<T>]>,
    free_indices: Vec<usize>,
}

impl<T> NodeSlab<T> {
    /// Creates a slab with `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| None).collect::<Vec<_>>().into_boxed_slice();
        // Reversed so that slot 0 is handed out first.
        let free_indices = (0..capacity).rev().collect();
        Self {
            slots,
            free_indices,
        }
    }

    /// Stores `value` in a free slot, or returns `None` if every slot is in use.
    #[inline]
    pub fn allocate(&mut self, value: T) -> Option<usize> {
        let index = self.free_indices.pop()?;
        self.slots[index] = Some(value);
        Some(index)
    }

    /// Returns the slot to the free list and hands back its value.
    #[inline]
    pub fn release(&mut self, index: usize) -> Option<T> {
        let value = self.slots.get_mut(index)?.take()?;
        // Never exceeds the capacity reserved in `new`, so this cannot reallocate.
        self.free_indices.push(index);
        Some(value)
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// Number of occupied slots.
    #[inline]
    pub fn allocated_count(&self) -> usize {
        self.slots.len() - self.free_indices.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
