//! # Stack Allocator
//!
//! Frame-scoped LIFO pool. Objects are pushed during a frame and released all
//! at once by [`StackAllocator::reset`].

use super::template::{Pool, Template};
use crate::error::AllocError;

/// A LIFO pool of pre-built objects.
///
/// `reset` only moves the top marker back to zero: no destructor runs and the
/// objects are reused in place on the next frame.
///
/// # Thread Safety
///
/// This stack is NOT thread-safe. Use one stack per thread.
///
/// # Example
///
/// ```rust,ignore
/// let mut scratch = StackAllocator::new(1024, &Template::Prototype([0.0f32; 4]));
///
/// *scratch.push()? = [1.0, 0.0, 0.0, 1.0];
///
/// // End of frame
/// scratch.reset();
/// ```
#[derive(Debug)]
pub struct StackAllocator<T> {
    /// Pre-built slots.
    slots: Box<[T]>,
    /// Number of live slots.
    top: usize,
}

impl<T: Clone> StackAllocator<T> {
    /// Creates a stack with `capacity` pre-built slots.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero.
    #[must_use]
    pub fn new(capacity: usize, template: &Template<T>) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        Self {
            slots: template.fill(capacity),
            top: 0,
        }
    }
}

impl<T> StackAllocator<T> {
    /// Claims the next slot and returns it for in-place initialisation.
    ///
    /// # Errors
    ///
    /// [`AllocError::CapacityExceeded`] when every slot is live.
    pub fn push(&mut self) -> Result<&mut T, AllocError> {
        if self.top == self.slots.len() {
            return Err(AllocError::CapacityExceeded {
                capacity: self.slots.len(),
            });
        }
        self.top += 1;
        Ok(&mut self.slots[self.top - 1])
    }

    /// Claims the next slot and overwrites it with `value`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::push`].
    pub fn push_value(&mut self, value: T) -> Result<(), AllocError> {
        *self.push()? = value;
        Ok(())
    }

    /// Releases the top slot. The object stays in place until overwritten.
    ///
    /// # Errors
    ///
    /// [`AllocError::Empty`] when nothing is live.
    pub fn pop(&mut self) -> Result<&mut T, AllocError> {
        if self.top == 0 {
            return Err(AllocError::Empty);
        }
        self.top -= 1;
        Ok(&mut self.slots[self.top])
    }

    /// Reads the top slot.
    ///
    /// # Errors
    ///
    /// [`AllocError::Empty`] when nothing is live.
    pub fn peek(&self) -> Result<&T, AllocError> {
        self.top
            .checked_sub(1)
            .map(|index| &self.slots[index])
            .ok_or(AllocError::Empty)
    }

    /// Live objects, bottom first.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.slots[..self.top]
    }

    /// Live objects, bottom first, mutable.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.slots[..self.top]
    }

    /// Returns the remaining free slots.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.slots.len() - self.top
    }
}

impl<T> Pool<T> for StackAllocator<T> {
    type Iter<'a> = std::slice::Iter<'a, T> where T: 'a;

    fn len(&self) -> usize {
        self.top
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// O(1): moves the top marker only.
    #[inline]
    fn reset(&mut self) {
        self.top = 0;
    }

    fn iter(&self) -> Self::Iter<'_> {
        self.as_slice().iter()
    }
}
