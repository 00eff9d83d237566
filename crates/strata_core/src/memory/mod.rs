//! # Memory Management
//!
//! Pre-sized pool allocators shared by the storage engine and any other
//! subsystem that wants recycled objects instead of fresh allocations.
//!
//! ## Strategies
//!
//! | Pool | Release order | On overflow |
//! |------|---------------|-------------|
//! | [`RingAllocator`] | oldest first | error or overwrite oldest |
//! | [`StackAllocator`] | LIFO / whole frame | error |
//! | [`FreeListAllocator`] | any | out of memory |
//! | [`RandomAccessAllocator`] | any index | grows |
//!
//! All four implement [`Pool`].

mod free_list;
mod random_access;
mod ring;
mod stack;
mod template;

pub use free_list::{FreeListAllocator, FreeListHandle};
pub use random_access::{RandomAccessAllocator, MIN_RANDOM_ACCESS_CAPACITY};
pub use ring::{RingAllocator, RingHandle, RingMode};
pub use stack::StackAllocator;
pub use template::{Pool, Template};
