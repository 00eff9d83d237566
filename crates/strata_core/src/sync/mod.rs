//! # External Synchronization
//!
//! Moves fragment data out of the world into buffers owned by someone else
//! (a renderer, a staging area read by another thread).
//!
//! ## The Problem
//!
//! ```text
//! World:     column per field, chunk per 128 slots, holes after deletes
//! Renderer:  one tightly packed array per fragment
//! ```
//!
//! ## The Solution
//!
//! ```text
//! Frame N:
//!   writes set per-chunk dirty bits
//!   structural changes mark the fragment stale
//!   to_external_data() uploads only what changed
//! ```

mod external;
mod shared;

pub(crate) use external::ExternalMirror;
pub use external::{
    BufferDescriptor, ExternalBufferSink, ExternalData, ExternalHandle, SyncAction, SyncCounters,
    SyncStats,
};
pub use shared::{SharedBuffer, SharedBufferReader, SharedBufferSink};
