//! # Entity Identity
//!
//! Entities are lightweight identifiers consisting of:
//! - An index into the entity directory
//! - A generation counter for safe reuse
//!
//! Logical per-entity state lives in [`EntityFlags`], stored once in the
//! chunk slot that starts the entity's first segment.

use std::ops::{BitOr, BitOrAssign};

use bytemuck::{Pod, Zeroable};

/// Unique identifier for an entity.
///
/// The ID is split into two parts:
/// - Lower 32 bits: Index into the entity directory
/// - Upper 32 bits: Generation counter for detecting stale references
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Creates a new entity ID from index and generation.
    ///
    /// # Arguments
    ///
    /// * `index` - The directory index (0 to 2^32-1)
    /// * `generation` - The generation counter (0 to 2^32-1)
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Returns the raw 64-bit value.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Null/invalid entity ID.
    pub const NULL: Self = Self(u64::MAX);

    /// Checks if this entity ID is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

/// Logical entity state bits.
///
/// Stored on the first slot of an entity's first segment. Every other
/// instance slot carries [`EntityFlags::NONE`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct EntityFlags(u16);

impl EntityFlags {
    /// No bits set.
    pub const NONE: Self = Self(0);
    /// Slot holds a live entity.
    pub const ALIVE: Self = Self(1 << 0);
    /// Deletion requested; swept at the next frame boundary.
    pub const PENDING_DELETE: Self = Self(1 << 1);
    /// Data written since the flag was last cleared.
    pub const DIRTY: Self = Self(1 << 2);
    /// Transform needs recomputation.
    pub const TRANSFORM_DIRTY: Self = Self(1 << 3);
    /// Bounding volume needs recomputation.
    pub const AABB_DIRTY: Self = Self(1 << 4);
    /// Bounding volume is never recomputed.
    pub const NO_AABB_UPDATE: Self = Self(1 << 5);
    /// Always faces the camera.
    pub const BILLBOARD: Self = Self(1 << 6);
    /// Ignore the parent's scale when composing transforms.
    pub const IGNORE_PARENT_SCALE: Self = Self(1 << 7);
    /// Ignore the parent's rotation when composing transforms.
    pub const IGNORE_PARENT_ROTATION: Self = Self(1 << 8);

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Builds flags from raw bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Checks that every bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Checks that any bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Sets the bits of `other`.
    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the bits of `other`.
    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Returns `self` without the bits of `other`.
    #[inline]
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Returns `true` when no bit is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Shorthand for `contains(ALIVE)`.
    #[inline]
    #[must_use]
    pub const fn is_alive(self) -> bool {
        self.contains(Self::ALIVE)
    }
}

impl BitOr for EntityFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EntityFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_roundtrip() {
        let id = EntityId::new(12345, 67890);
        assert_eq!(id.index(), 12345);
        assert_eq!(id.generation(), 67890);
        assert!(!id.is_null());
        assert!(EntityId::default().is_null());
    }

    #[test]
    fn test_flag_bits() {
        let mut flags = EntityFlags::ALIVE | EntityFlags::DIRTY;
        assert!(flags.is_alive());
        assert!(flags.contains(EntityFlags::DIRTY));
        assert!(!flags.contains(EntityFlags::BILLBOARD));

        flags.insert(EntityFlags::BILLBOARD);
        flags.remove(EntityFlags::DIRTY);
        assert!(flags.intersects(EntityFlags::BILLBOARD | EntityFlags::AABB_DIRTY));
        assert!(!flags.contains(EntityFlags::DIRTY));
        assert_eq!(flags.without(EntityFlags::ALIVE | EntityFlags::BILLBOARD), EntityFlags::NONE);
    }

    #[test]
    fn test_flag_layout() {
        assert_eq!(std::mem::size_of::<EntityFlags>(), 2);
        assert_eq!(EntityFlags::IGNORE_PARENT_ROTATION.bits(), 256);
    }
}
