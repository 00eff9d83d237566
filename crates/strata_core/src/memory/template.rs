//! # Pool Templates
//!
//! Every pool is pre-filled at construction. The template decides what each
//! slot starts as; recycled slots are reused in place, never rebuilt.

use std::fmt;

/// Initial value source for pre-sized pools.
pub enum Template<T> {
    /// Clone this prototype into every slot.
    Prototype(T),
    /// Call this factory once per slot.
    Factory(Box<dyn Fn() -> T + Send + Sync>),
}

impl<T: Clone> Template<T> {
    /// Builds one slot value.
    #[inline]
    #[must_use]
    pub fn instantiate(&self) -> T {
        match self {
            Self::Prototype(value) => value.clone(),
            Self::Factory(factory) => factory(),
        }
    }

    /// Builds `count` slot values.
    #[must_use]
    pub fn fill(&self, count: usize) -> Box<[T]> {
        (0..count).map(|_| self.instantiate()).collect()
    }
}

impl<T: Default> Default for Template<T> {
    fn default() -> Self {
        Self::Prototype(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Template<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prototype(value) => f.debug_tuple("Prototype").field(value).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Shared contract of the four pool strategies.
///
/// Lets callers swap ring/stack/free-list/random-access storage without
/// touching the code that walks the live objects.
pub trait Pool<T> {
    /// Iterator over live objects, oldest/lowest first.
    type Iter<'a>: Iterator<Item = &'a T>
    where
        Self: 'a,
        T: 'a;

    /// Number of live objects.
    fn len(&self) -> usize;

    /// Number of slots available without reconfiguration.
    fn capacity(&self) -> usize;

    /// Returns `true` when no object is live.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases every live object. Slot contents are left for reuse.
    fn reset(&mut self);

    /// Walks the live objects in allocation order.
    fn iter(&self) -> Self::Iter<'_>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_prototype_fill() {
        let template = Template::Prototype(vec![1u8, 2]);
        let slots = template.fill(3);
        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(|slot| slot == &vec![1, 2]));
    }

    #[test]
    fn test_factory_called_per_slot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let template = Template::Factory(Box::new(move || counter.fetch_add(1, Ordering::Relaxed)));
        let slots = template.fill(4);
        assert_eq!(&*slots, &[0, 1, 2, 3]);
        assert_eq!(calls.load(Ordering::Relaxed), 4);
    }
}
