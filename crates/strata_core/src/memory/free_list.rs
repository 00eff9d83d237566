//! # Free-List Allocator
//!
//! Fixed-capacity pool for objects held longer than a frame and released in
//! no particular order.

use super::template::{Pool, Template};
use crate::error::AllocError;

/// Handle to an allocated free-list slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FreeListHandle {
    /// Index into the pool.
    index: usize,
}

impl FreeListHandle {
    /// Slot index inside the pool.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }
}

/// A pool allocator with O(1) allocate/free by slot id.
///
/// Never wraps: once every slot is live, `allocate` fails with
/// [`AllocError::OutOfMemory`].
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. Use one pool per thread or wrap in a mutex.
///
/// # Example
///
/// ```rust,ignore
/// let mut pool = FreeListAllocator::new(10_000, &Template::Prototype(Particle::default()));
///
/// // Allocate - O(1), no heap allocation
/// let handle = pool.insert(Particle { life: 1.0, ..Default::default() })?;
///
/// // Free - O(1), no heap deallocation
/// pool.deallocate(handle)?;
/// ```
#[derive(Debug)]
pub struct FreeListAllocator<T> {
    /// Pre-built slots.
    storage: Box<[T]>,
    /// Liveness per slot.
    live: Box<[bool]>,
    /// Free list - indices of available slots.
    free_list: Vec<usize>,
    /// Number of allocated objects.
    allocated_count: usize,
}

impl<T: Clone> FreeListAllocator<T> {
    /// Creates a new pool with the specified capacity.
    ///
    /// All memory is pre-allocated upfront.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero.
    #[must_use]
    pub fn new(capacity: usize, template: &Template<T>) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");

        Self {
            storage: template.fill(capacity),
            live: vec![false; capacity].into_boxed_slice(),
            // Lowest index comes off the end first
            free_list: (0..capacity).rev().collect(),
            allocated_count: 0,
        }
    }
}

impl<T> FreeListAllocator<T> {
    /// Returns the number of free slots.
    #[inline]
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.storage.len() - self.allocated_count
    }

    /// Pops an available slot.
    ///
    /// # Errors
    ///
    /// [`AllocError::OutOfMemory`] if every slot is live.
    pub fn allocate(&mut self) -> Result<FreeListHandle, AllocError> {
        let index = self.free_list.pop().ok_or(AllocError::OutOfMemory {
            capacity: self.storage.len(),
        })?;

        self.live[index] = true;
        self.allocated_count += 1;
        Ok(FreeListHandle { index })
    }

    /// Allocates a slot and stores `value` in it.
    ///
    /// # Errors
    ///
    /// Same as [`Self::allocate`].
    pub fn insert(&mut self, value: T) -> Result<FreeListHandle, AllocError> {
        let handle = self.allocate()?;
        self.storage[handle.index] = value;
        Ok(handle)
    }

    /// Returns a slot to the free set.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidIndex`] if the handle is not live.
    pub fn deallocate(&mut self, handle: FreeListHandle) -> Result<(), AllocError> {
        if !self.is_live(handle) {
            return Err(AllocError::InvalidIndex {
                index: handle.index,
                len: self.storage.len(),
            });
        }

        self.live[handle.index] = false;
        self.free_list.push(handle.index);
        self.allocated_count -= 1;
        Ok(())
    }

    /// Checks whether a handle refers to a live slot.
    #[inline]
    #[must_use]
    pub fn is_live(&self, handle: FreeListHandle) -> bool {
        self.live.get(handle.index).copied().unwrap_or(false)
    }

    /// Gets a reference to an allocated object.
    #[inline]
    #[must_use]
    pub fn get(&self, handle: FreeListHandle) -> Option<&T> {
        self.is_live(handle).then(|| &self.storage[handle.index])
    }

    /// Gets a mutable reference to an allocated object.
    #[inline]
    pub fn get_mut(&mut self, handle: FreeListHandle) -> Option<&mut T> {
        if self.is_live(handle) {
            Some(&mut self.storage[handle.index])
        } else {
            None
        }
    }

    /// Iterates over all allocated objects with their handles.
    pub fn iter_handles(&self) -> impl Iterator<Item = (FreeListHandle, &T)> {
        self.storage
            .iter()
            .zip(self.live.iter())
            .enumerate()
            .filter_map(|(index, (value, live))| live.then_some((FreeListHandle { index }, value)))
    }

    /// Iterates mutably over all allocated objects.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (FreeListHandle, &mut T)> {
        self.storage
            .iter_mut()
            .zip(self.live.iter())
            .enumerate()
            .filter_map(|(index, (value, live))| live.then_some((FreeListHandle { index }, value)))
    }
}

/// Iterator over live free-list slots in index order.
pub struct FreeListIter<'a, T> {
    storage: &'a [T],
    live: &'a [bool],
    cursor: usize,
}

impl<'a, T> Iterator for FreeListIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor < self.storage.len() {
            let index = self.cursor;
            self.cursor += 1;
            if self.live[index] {
                return Some(&self.storage[index]);
            }
        }
        None
    }
}

impl<T> Pool<T> for FreeListAllocator<T> {
    type Iter<'a> = FreeListIter<'a, T> where T: 'a;

    fn len(&self) -> usize {
        self.allocated_count
    }

    fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Marks every slot free. Contents are not dropped.
    fn reset(&mut self) {
        self.live.fill(false);
        self.free_list.clear();
        self.free_list.extend((0..self.storage.len()).rev());
        self.allocated_count = 0;
    }

    fn iter(&self) -> Self::Iter<'_> {
        FreeListIter {
            storage: &self.storage,
            live: &self.live,
            cursor: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_allocate_free() {
        let mut pool = FreeListAllocator::new(10, &Template::Prototype(0u32));

        let h1 = pool.insert(42).unwrap();
        assert_eq!(*pool.get(h1).unwrap(), 42);
        assert_eq!(pool.len(), 1);

        pool.deallocate(h1).unwrap();
        assert_eq!(pool.len(), 0);
        assert!(pool.get(h1).is_none());
    }

    #[test]
    fn test_pool_full_never_wraps() {
        let mut pool = FreeListAllocator::new(2, &Template::Prototype(0u8));

        pool.allocate().unwrap();
        pool.allocate().unwrap();
        assert_eq!(
            pool.allocate(),
            Err(AllocError::OutOfMemory { capacity: 2 })
        );
    }

    #[test]
    fn test_pool_reuse() {
        let mut pool = FreeListAllocator::new(1, &Template::Prototype(0u32));

        let h1 = pool.insert(1).unwrap();
        pool.deallocate(h1).unwrap();

        let h2 = pool.insert(2).unwrap();
        assert_eq!(h1.index(), h2.index()); // Same slot reused
        assert_eq!(*pool.get(h2).unwrap(), 2);
    }

    #[test]
    fn test_double_free_is_invalid_index() {
        let mut pool = FreeListAllocator::new(3, &Template::Prototype(()));
        let handle = pool.allocate().unwrap();
        pool.deallocate(handle).unwrap();

        let err = pool.deallocate(handle).unwrap_err();
        assert!(!err.is_capacity_error());
        assert_eq!(err, AllocError::InvalidIndex { index: 0, len: 3 });
    }

    #[test]
    fn test_iter_live_only() {
        let mut pool = FreeListAllocator::new(4, &Template::Prototype(0u32));
        let a = pool.insert(1).unwrap();
        pool.insert(2).unwrap();
        pool.insert(3).unwrap();
        pool.deallocate(a).unwrap();

        assert_eq!(pool.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
        pool.reset();
        assert_eq!(pool.free_count(), 4);
    }
}
