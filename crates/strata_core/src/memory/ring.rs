//! # Ring Allocator
//!
//! Fixed-capacity circular pool. Head and tail advance modulo capacity.

use super::template::{Pool, Template};
use crate::error::AllocError;

/// What `allocate` does once every slot is live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RingMode {
    /// Refuse with [`AllocError::CapacityExceeded`].
    Bounded,
    /// Drop the oldest live slot and keep writing.
    FrameScoped,
}

/// Handle to a ring slot.
///
/// In [`RingMode::FrameScoped`] the slot may already have been handed out
/// again once more than `capacity` allocations happened after this one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RingHandle(usize);

impl RingHandle {
    /// Slot index inside the ring.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A circular pool of pre-built objects.
///
/// # Example
///
/// ```rust,ignore
/// let mut ring = RingAllocator::frame_scoped(2, &Template::Prototype(0u32));
/// let a = ring.allocate()?;
/// let _ = ring.allocate()?;
/// let c = ring.allocate()?; // wraps
/// assert_eq!(a.index(), c.index());
/// ```
#[derive(Debug)]
pub struct RingAllocator<T> {
    /// Pre-built slots.
    slots: Box<[T]>,
    /// Next slot to hand out.
    head: usize,
    /// Oldest live slot.
    tail: usize,
    /// Live slot count.
    len: usize,
    /// Overflow policy.
    mode: RingMode,
}

impl<T: Clone> RingAllocator<T> {
    /// Creates a ring with the given overflow policy.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero.
    #[must_use]
    pub fn new(capacity: usize, template: &Template<T>, mode: RingMode) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        Self {
            slots: template.fill(capacity),
            head: 0,
            tail: 0,
            len: 0,
            mode,
        }
    }

    /// Ring that refuses to overwrite live slots.
    #[must_use]
    pub fn bounded(capacity: usize, template: &Template<T>) -> Self {
        Self::new(capacity, template, RingMode::Bounded)
    }

    /// Ring that overwrites the oldest slot when full.
    #[must_use]
    pub fn frame_scoped(capacity: usize, template: &Template<T>) -> Self {
        Self::new(capacity, template, RingMode::FrameScoped)
    }
}

impl<T> RingAllocator<T> {
    /// Returns the overflow policy.
    #[inline]
    #[must_use]
    pub const fn mode(&self) -> RingMode {
        self.mode
    }

    /// Hands out the next slot.
    ///
    /// # Errors
    ///
    /// [`AllocError::CapacityExceeded`] when a bounded ring is full.
    pub fn allocate(&mut self) -> Result<RingHandle, AllocError> {
        let capacity = self.slots.len();
        if self.len == capacity {
            match self.mode {
                RingMode::Bounded => return Err(AllocError::CapacityExceeded { capacity }),
                RingMode::FrameScoped => {
                    self.tail = (self.tail + 1) % capacity;
                    self.len -= 1;
                }
            }
        }

        let index = self.head;
        self.head = (self.head + 1) % capacity;
        self.len += 1;
        Ok(RingHandle(index))
    }

    /// Allocates a slot and stores `value` in it.
    ///
    /// # Errors
    ///
    /// Same as [`Self::allocate`].
    pub fn push(&mut self, value: T) -> Result<RingHandle, AllocError> {
        let handle = self.allocate()?;
        self.slots[handle.0] = value;
        Ok(handle)
    }

    /// Releases the oldest live slot.
    ///
    /// # Errors
    ///
    /// [`AllocError::Empty`] when nothing is live.
    pub fn deallocate(&mut self) -> Result<RingHandle, AllocError> {
        if self.len == 0 {
            return Err(AllocError::Empty);
        }
        let index = self.tail;
        self.tail = (self.tail + 1) % self.slots.len();
        self.len -= 1;
        Ok(RingHandle(index))
    }

    /// Reads a slot.
    #[inline]
    #[must_use]
    pub fn get(&self, handle: RingHandle) -> Option<&T> {
        self.slots.get(handle.0)
    }

    /// Writes a slot in place.
    #[inline]
    pub fn get_mut(&mut self, handle: RingHandle) -> Option<&mut T> {
        self.slots.get_mut(handle.0)
    }

    /// Most recently allocated live object.
    #[must_use]
    pub fn newest(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        let capacity = self.slots.len();
        Some(&self.slots[(self.head + capacity - 1) % capacity])
    }
}

/// Iterator over live ring slots, oldest first.
pub struct RingIter<'a, T> {
    slots: &'a [T],
    cursor: usize,
    remaining: usize,
}

impl<'a, T> Iterator for RingIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = &self.slots[self.cursor];
        self.cursor = (self.cursor + 1) % self.slots.len();
        self.remaining -= 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> Pool<T> for RingAllocator<T> {
    type Iter<'a> = RingIter<'a, T> where T: 'a;

    fn len(&self) -> usize {
        self.len
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }

    fn iter(&self) -> Self::Iter<'_> {
        RingIter {
            slots: &self.slots,
            cursor: self.tail,
            remaining: self.len,
        }
    }
}
