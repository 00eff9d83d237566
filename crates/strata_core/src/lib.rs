//! # STRATA Core
//!
//! Chunked archetype storage for scene entities:
//! - Entities grouped by fragment set into archetypes of fixed-size chunks
//! - Instanced entities stored as runs of consecutive slots
//! - Dirty tracking that uploads only changed chunks to external buffers
//!
//! ## Architecture Rules
//!
//! 1. **Pre-sized storage** - pools, chunks and query slots are sized from
//!    [`StoreConfig`]; growth happens at structural changes only
//! 2. **Column per field** - every field of every fragment is one
//!    contiguous array per chunk
//! 3. **All-or-nothing structure** - a migration either completes or leaves
//!    the entity where it was
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_core::{FragmentData, StoreConfig, World};
//!
//! let mut world = World::new(StoreConfig::default())?;
//! let ids = world.register_builtins()?;
//! let tree = world.spawn(&[FragmentData::new(ids.transform)])?;
//! world.set_entity_instance_count(tree, 500)?;
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod ecs;
pub mod error;
pub mod hierarchy;
pub mod memory;
pub mod sync;

pub use config::StoreConfig;
pub use ecs::{
    Archetype, ArchetypeId, ArchetypeSignature, BuiltinFragment, BuiltinIds, Chunk, ChunkRef,
    Column, Command, CommandBuffer, EntityFlags, EntityId, FieldDef, FragmentData, FragmentId,
    FragmentSchema, QueryDescriptor, QueryHandle, ScalarKind, World,
};
pub use error::{AllocError, ConfigError, StoreError, StoreResult};
pub use hierarchy::{Hierarchy, NodeId};
pub use memory::{
    FreeListAllocator, Pool, RandomAccessAllocator, RingAllocator, StackAllocator, Template,
};
pub use sync::{ExternalBufferSink, ExternalData, ExternalHandle, SharedBufferSink, SyncStats};
