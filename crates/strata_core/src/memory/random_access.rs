//! # Random-Access Allocator
//!
//! Growable array pool with index-based insert/remove. The only strategy that
//! supports arbitrary positional insertion.

use super::template::{Pool, Template};
use crate::error::AllocError;

/// Smallest capacity the pool shrinks to.
pub const MIN_RANDOM_ACCESS_CAPACITY: usize = 16;

/// A dense, index-addressed pool.
///
/// - `allocate`/`deallocate` at the end: amortised O(1), capacity doubles.
/// - `allocate_at`/`deallocate_at`: O(n) shift.
/// - When the length drops below a quarter of capacity, capacity halves
///   (never below [`MIN_RANDOM_ACCESS_CAPACITY`]).
#[derive(Debug)]
pub struct RandomAccessAllocator<T> {
    /// Live objects.
    items: Vec<T>,
    /// Logical capacity (grows by doubling, shrinks by halving).
    capacity: usize,
    /// Source of fresh slot values.
    template: Template<T>,
}

impl<T: Clone> RandomAccessAllocator<T> {
    /// Creates a pool with room for `capacity` objects.
    #[must_use]
    pub fn new(capacity: usize, template: Template<T>) -> Self {
        let capacity = capacity.max(MIN_RANDOM_ACCESS_CAPACITY);
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            template,
        }
    }

    /// Appends a template object, returning its index.
    pub fn allocate(&mut self) -> usize {
        let value = self.template.instantiate();
        self.push(value)
    }

    /// Inserts a template object at `index`, shifting later objects up.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidIndex`] if `index > len`.
    pub fn allocate_at(&mut self, index: usize) -> Result<(), AllocError> {
        let value = self.template.instantiate();
        self.insert(index, value)
    }
}

impl<T> RandomAccessAllocator<T> {
    /// Appends `value`, returning its index.
    pub fn push(&mut self, value: T) -> usize {
        self.grow_for_one();
        self.items.push(value);
        self.items.len() - 1
    }

    /// Inserts `value` at `index`, shifting later objects up.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidIndex`] if `index > len`.
    pub fn insert(&mut self, index: usize, value: T) -> Result<(), AllocError> {
        if index > self.items.len() {
            return Err(AllocError::InvalidIndex {
                index,
                len: self.items.len(),
            });
        }
        self.grow_for_one();
        self.items.insert(index, value);
        Ok(())
    }

    /// Removes the last object.
    ///
    /// # Errors
    ///
    /// [`AllocError::Empty`] when nothing is live.
    pub fn deallocate(&mut self) -> Result<T, AllocError> {
        let value = self.items.pop().ok_or(AllocError::Empty)?;
        self.shrink_if_underfilled();
        Ok(value)
    }

    /// Removes the object at `index`, shifting later objects down.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidIndex`] if `index >= len`.
    pub fn deallocate_at(&mut self, index: usize) -> Result<T, AllocError> {
        if index >= self.items.len() {
            return Err(AllocError::InvalidIndex {
                index,
                len: self.items.len(),
            });
        }
        let value = self.items.remove(index);
        self.shrink_if_underfilled();
        Ok(value)
    }

    /// Reads the object at `index`.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidIndex`] if `index >= len`.
    pub fn get(&self, index: usize) -> Result<&T, AllocError> {
        let len = self.items.len();
        self.items
            .get(index)
            .ok_or(AllocError::InvalidIndex { index, len })
    }

    /// Mutable access to the object at `index`.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidIndex`] if `index >= len`.
    pub fn get_mut(&mut self, index: usize) -> Result<&mut T, AllocError> {
        let len = self.items.len();
        self.items
            .get_mut(index)
            .ok_or(AllocError::InvalidIndex { index, len })
    }

    /// Overwrites the object at `index`.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidIndex`] if `index >= len`.
    pub fn set(&mut self, index: usize, value: T) -> Result<(), AllocError> {
        *self.get_mut(index)? = value;
        Ok(())
    }

    /// Live objects as a slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Position of the first object matching `predicate`.
    pub fn position(&self, predicate: impl FnMut(&T) -> bool) -> Option<usize> {
        self.items.iter().position(predicate)
    }

    fn grow_for_one(&mut self) {
        if self.items.len() == self.capacity {
            self.capacity *= 2;
            self.items.reserve_exact(self.capacity - self.items.len());
        }
    }

    fn shrink_if_underfilled(&mut self) {
        let mut shrunk = false;
        while self.capacity > MIN_RANDOM_ACCESS_CAPACITY && self.items.len() < self.capacity / 4 {
            self.capacity = (self.capacity / 2).max(MIN_RANDOM_ACCESS_CAPACITY);
            shrunk = true;
        }
        if shrunk {
            self.items.shrink_to(self.capacity);
        }
    }
}

impl<T> Pool<T> for RandomAccessAllocator<T> {
    type Iter<'a> = std::slice::Iter<'a, T> where T: 'a;

    fn len(&self) -> usize {
        self.items.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn reset(&mut self) {
        self.items.clear();
        self.shrink_if_underfilled();
    }

    fn iter(&self) -> Self::Iter<'_> {
        self.items.iter()
    }
}
