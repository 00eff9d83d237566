//! # Entity Storage
//!
//! Chunked archetype storage for scene entities.
//!
//! ## Layout
//!
//! ```text
//! World
//!  ├── FragmentRegistry      fragment id -> schema
//!  ├── Archetype (per fragment set)
//!  │    └── Chunk[]          fixed capacity, column per field
//!  │         ├── columns     SoA data, dirty bits per fragment
//!  │         ├── occupancy   one bit per slot
//!  │         └── flags / run lengths / owners
//!  └── EntityDirectory       entity -> archetype + segments
//! ```
//!
//! - Entities with the same fragment set share an archetype.
//! - An entity with N instances occupies N consecutive slots, split into
//!   segments when one chunk cannot hold the run.
//! - Adding or removing a fragment moves the entity to another archetype.

mod accessor;
mod archetype;
mod bitmap;
mod builtin;
mod chunk;
mod column;
mod commands;
mod directory;
mod entity;
mod fragment;
mod migration;
mod query;
mod world;

pub use accessor::{AccessorHandle, FieldAccessor};
pub use archetype::{Archetype, ArchetypeId, ArchetypeLayout, ArchetypeSignature};
pub use bitmap::{SetBits, SlotBitmap};
pub use builtin::{BuiltinFragment, BuiltinIds, MAX_MATERIAL_SLOTS};
pub use chunk::{Chunk, ChunkColumns, ChunkRef, FragmentView, FragmentViewMut};
pub use column::{Column, Scalar, ScalarKind};
pub use commands::{Command, CommandBuffer};
pub use directory::{EntityDirectory, EntityLocation, Segment};
pub use entity::{EntityFlags, EntityId};
pub use fragment::{
    FieldDef, FragmentData, FragmentId, FragmentRegistry, FragmentSchema, FragmentSchemaBuilder,
    UsageMask, DEFAULT_VIEW_CAPACITY, MAX_FRAGMENTS,
};
pub use query::{QueryDescriptor, QueryHandle};
pub use world::World;
