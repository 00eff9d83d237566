//! # Store Error Types
//!
//! Every fallible operation in the storage core returns [`StoreResult`].
//!
//! Errors fall into three groups:
//! - **Caller bugs** (bad shapes, stale ids, malformed queries): returned
//!   immediately, never retried.
//! - **Capacity errors** ([`AllocError`] capacity variants, [`StoreError::ChunkLimit`],
//!   [`StoreError::TooManyFragments`]): the configuration needs tuning.
//! - **Invalid index** ([`AllocError::InvalidIndex`]): a logic bug touching an
//!   unallocated slot. Kept apart from capacity errors on purpose.

use thiserror::Error;

use crate::ecs::{ArchetypeId, EntityId, FragmentId, ScalarKind};

/// Errors raised by the pool allocators in [`crate::memory`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// A bounded allocator is full.
    #[error("allocator over capacity: capacity {capacity}")]
    CapacityExceeded {
        /// The fixed capacity of the allocator.
        capacity: usize,
    },

    /// A free-list allocator has no free index left.
    #[error("out of memory: all {capacity} slots are allocated")]
    OutOfMemory {
        /// The fixed capacity of the allocator.
        capacity: usize,
    },

    /// Pop/peek/deallocate on an empty allocator.
    #[error("allocator is empty")]
    Empty,

    /// Access to an index that is not currently allocated.
    #[error("invalid index {index} (length {len})")]
    InvalidIndex {
        /// The offending index.
        index: usize,
        /// Number of slots (live or total, depending on the allocator).
        len: usize,
    },
}

impl AllocError {
    /// Returns `true` for the "tune the capacity" class of errors.
    #[inline]
    #[must_use]
    pub const fn is_capacity_error(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. } | Self::OutOfMemory { .. } | Self::Empty
        )
    }
}

/// Errors raised while loading or validating a [`crate::StoreConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The TOML text could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(String),

    /// A value is out of range.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Errors raised by the storage engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The entity id is dead or stale (generation mismatch).
    #[error("unknown or stale entity {0:?}")]
    UnknownEntity(EntityId),

    /// The entity does not carry the fragment.
    #[error("entity {entity:?} has no fragment `{fragment}`")]
    FragmentNotAttached {
        /// The entity.
        entity: EntityId,
        /// Name of the fragment.
        fragment: String,
    },

    /// A record names a field the fragment schema does not declare.
    #[error("fragment `{fragment}` has no field `{field}`")]
    UnknownField {
        /// Fragment name.
        fragment: String,
        /// Field name.
        field: String,
    },

    /// A variable-length field received more elements than its declared maximum.
    #[error("field `{fragment}.{field}` got {len} elements, maximum stride is {max}")]
    StrideExceeded {
        /// Fragment name.
        fragment: String,
        /// Field name.
        field: String,
        /// Number of elements supplied.
        len: usize,
        /// Declared maximum.
        max: usize,
    },

    /// A fixed-size field received the wrong number of elements.
    #[error("field `{fragment}.{field}` expects {expected} elements, got {actual}")]
    ShapeMismatch {
        /// Fragment name.
        fragment: String,
        /// Field name.
        field: String,
        /// Declared element count.
        expected: usize,
        /// Number of elements supplied.
        actual: usize,
    },

    /// A value has the wrong scalar kind for its field.
    #[error("field `{fragment}.{field}` stores {expected:?}, got {actual:?}")]
    KindMismatch {
        /// Fragment name.
        fragment: String,
        /// Field name.
        field: String,
        /// Declared kind.
        expected: ScalarKind,
        /// Supplied kind.
        actual: ScalarKind,
    },

    /// The query filter is malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The query handle does not refer to a live query.
    #[error("unknown query handle")]
    UnknownQuery,

    /// Instance counts must be at least one.
    #[error("invalid instance count {0}")]
    InvalidInstanceCount(u32),

    /// Instance index past the entity's instance count.
    #[error("instance {index} out of range for entity {entity:?} ({count} instances)")]
    InstanceOutOfRange {
        /// The entity.
        entity: EntityId,
        /// Requested instance.
        index: u32,
        /// The entity's instance count.
        count: u32,
    },

    /// A field accessor outlived the location it was created for.
    #[error("field accessor is stale")]
    StaleAccessor,

    /// A different schema is already registered under this name.
    #[error("fragment `{0}` is already registered with a different schema")]
    SchemaConflict(String),

    /// The schema failed validation.
    #[error("invalid fragment schema: {0}")]
    InvalidSchema(String),

    /// The fragment id is not registered.
    #[error("unregistered fragment {0:?}")]
    UnknownFragment(FragmentId),

    /// Registry is full.
    #[error("too many fragment types (limit {limit})")]
    TooManyFragments {
        /// Maximum number of fragment types.
        limit: usize,
    },

    /// The archetype cannot grow further.
    #[error("archetype {archetype:?} reached its chunk limit of {limit}")]
    ChunkLimit {
        /// The archetype.
        archetype: ArchetypeId,
        /// Maximum number of chunks.
        limit: usize,
    },

    /// A hierarchy node id is dead.
    #[error("unknown hierarchy node {0}")]
    UnknownNode(u32),

    /// Reparenting would create a cycle.
    #[error("reparenting node {node} under {parent} would create a cycle")]
    HierarchyCycle {
        /// Node being moved.
        node: u32,
        /// Requested parent.
        parent: u32,
    },

    /// Directory and chunk occupancy disagree.
    #[error("storage inconsistency: {0}")]
    Inconsistent(String),

    /// Allocator failure.
    #[error(transparent)]
    Alloc(#[from] AllocError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StoreError {
    /// Returns `true` when the error means "raise a capacity", not "fix a bug".
    #[must_use]
    pub fn is_capacity_error(&self) -> bool {
        match self {
            Self::Alloc(alloc) => alloc.is_capacity_error(),
            Self::ChunkLimit { .. } | Self::TooManyFragments { .. } => true,
            _ => false,
        }
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_classification() {
        assert!(AllocError::OutOfMemory { capacity: 4 }.is_capacity_error());
        assert!(AllocError::CapacityExceeded { capacity: 4 }.is_capacity_error());
        assert!(!AllocError::InvalidIndex { index: 9, len: 4 }.is_capacity_error());

        let wrapped: StoreError = AllocError::OutOfMemory { capacity: 1 }.into();
        assert!(wrapped.is_capacity_error());
        assert!(!StoreError::InvalidInstanceCount(0).is_capacity_error());
    }

    #[test]
    fn test_error_messages() {
        let err = StoreError::StrideExceeded {
            fragment: "mesh".into(),
            field: "material_slots".into(),
            len: 9,
            max: 8,
        };
        assert_eq!(
            err.to_string(),
            "field `mesh.material_slots` got 9 elements, maximum stride is 8"
        );
    }
}
