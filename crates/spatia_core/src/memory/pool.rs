//! # Node Pool
//!
//! Growable slot arena for the intrusive lists of the voxel hash.

/// Index value meaning "no node".
pub const NIL: u32 = u32::MAX;

/// A growable pool of nodes addressed by stable `u32` indices.
///
/// Freed slots go on a free list and are reused before the backing vector
/// grows. Because nodes are addressed by index rather than by reference, the
/// backing vector may reallocate without invalidating any live link.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. Each voxel hash owns its pools and mutates
/// them only under its tree's write lock.
///
/// # Example
///
/// ```rust,ignore
/// let mut pool: NodePool<Link> = NodePool::with_capacity(1024);
///
/// // Allocate - O(1), reuses a freed slot if one exists
/// let index = pool.allocate(Link { next: NIL });
///
/// // Free - O(1)
/// pool.free(index);
/// ```
#[derive(Debug)]
pub struct NodePool<T> {
    /// Slot storage; `None` marks a free slot.
    storage: Vec<Option<T>>,
    /// Free list - indices of available slots.
    free_list: Vec<u32>,
    /// Number of allocated nodes.
    allocated_count: usize,
}

impl<T> NodePool<T> {
    /// Creates an empty pool.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            storage: Vec::new(),
            free_list: Vec::new(),
            allocated_count: 0,
        }
    }

    /// Creates an empty pool with room for `capacity` nodes before growing.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            allocated_count: 0,
        }
    }

    /// Number of slots ever created (live + free).
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Returns the number of currently allocated nodes.
    #[inline]
    #[must_use]
    pub const fn allocated_count(&self) -> usize {
        self.allocated_count
    }

    /// Stores `value` and returns its index.
    ///
    /// O(1) amortized; only allocates when the free list is empty and the
    /// backing vector is full.
    pub fn allocate(&mut self, value: T) -> u32 {
        self.allocated_count += 1;
        if let Some(index) = self.free_list.pop() {
            self.storage[index as usize] = Some(value);
            return index;
        }
        let index = self.storage.len();
        debug_assert!(index < NIL as usize, "node pool exhausted the u32 index space");
        self.storage.push(Some(value));
        index as u32
    }

    /// Frees a node, returning its value.
    ///
    /// Returns `None` if the index was out of range or already free.
    pub fn free(&mut self, index: u32) -> Option<T> {
        let value = self.storage.get_mut(index as usize)?.take()?;
        self.free_list.push(index);
        self.allocated_count -= 1;
        Some(value)
    }

    /// Gets a reference to an allocated node.
    #[inline]
    #[must_use]
    pub fn get(&self, index: u32) -> Option<&T> {
        self.storage.get(index as usize)?.as_ref()
    }

    /// Gets a mutable reference to an allocated node.
    #[inline]
    pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        self.storage.get_mut(index as usize)?.as_mut()
    }

    /// Frees every node but keeps the backing memory.
    pub fn clear(&mut self) {
        self.storage.clear();
        self.free_list.clear();
        self.allocated_count = 0;
    }

    /// Iterates over all allocated nodes.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.storage
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|v| (index as u32, v)))
    }
}

impl<T> Default for NodePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_allocate_free() {
        let mut pool: NodePool<u32> = NodePool::new();

        let h1 = pool.allocate(42);
        assert_eq!(*pool.get(h1).unwrap(), 42);
        assert_eq!(pool.allocated_count(), 1);

        let freed = pool.free(h1).unwrap();
        assert_eq!(freed, 42);
        assert_eq!(pool.allocated_count(), 0);
        assert!(pool.get(h1).is_none());
    }

    #[test]
    fn test_pool_double_free_is_rejected() {
        let mut pool: NodePool<u8> = NodePool::new();
        let h = pool.allocate(1);
        assert!(pool.free(h).is_some());
        assert!(pool.free(h).is_none());
        assert!(pool.free(NIL).is_none());
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn test_pool_reuse() {
        let mut pool: NodePool<u32> = NodePool::with_capacity(1);

        let h1 = pool.allocate(1);
        pool.free(h1);

        let h2 = pool.allocate(2);
        assert_eq!(h1, h2); // Same slot reused
        assert_eq!(*pool.get(h2).unwrap(), 2);
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn test_pool_grows_without_moving_indices() {
        let mut pool: NodePool<usize> = NodePool::with_capacity(2);
        let handles: Vec<u32> = (0..100).map(|i| pool.allocate(i)).collect();
        for (i, h) in handles.iter().enumerate() {
            assert_eq!(*pool.get(*h).unwrap(), i);
        }
        assert_eq!(pool.iter().count(), 100);
    }
}
