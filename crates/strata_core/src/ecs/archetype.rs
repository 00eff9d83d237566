//! # Archetypes
//!
//! An archetype groups every entity carrying exactly the same set of
//! fragments. Its entities live in a list of equally sized chunks:
//!
//! ```text
//! Archetype {transform, light}:
//!   chunk 0 [e0 e0 e1 e2]   full
//!   chunk 1 [e3 -- -- --]   open
//!   open_chunks = [1]
//! ```
//!
//! Entities with the same fragment set are stored together, so iterating
//! an archetype walks contiguous columns.

use std::sync::Arc;

use super::chunk::{Chunk, ChunkRef};
use super::directory::Segment;
use super::entity::EntityId;
use super::fragment::{FragmentId, FragmentSchema};
use crate::error::{StoreError, StoreResult};
use crate::memory::{Pool, RandomAccessAllocator, Template};

/// Index of an archetype in its world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    /// The empty fragment set, where new entities start.
    pub const ROOT: Self = Self(0);

    /// Builds an id from a world index.
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// World index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Signature of an archetype - which fragments it contains.
///
/// Uses a sorted, deduplicated list of fragment ids for consistent hashing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ArchetypeSignature {
    /// Sorted list of fragment ids.
    fragments: Vec<FragmentId>,
}

impl ArchetypeSignature {
    /// Creates a signature from fragment ids in any order.
    #[must_use]
    pub fn new(mut fragments: Vec<FragmentId>) -> Self {
        fragments.sort_unstable();
        fragments.dedup();
        Self { fragments }
    }

    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            fragments: Vec::new(),
        }
    }

    /// Checks if the signature contains a fragment.
    #[inline]
    #[must_use]
    pub fn contains(&self, fragment: FragmentId) -> bool {
        self.fragments.binary_search(&fragment).is_ok()
    }

    /// Checks that every fragment of `other` is present.
    #[must_use]
    pub fn contains_all(&self, other: &Self) -> bool {
        other.fragments.iter().all(|&f| self.contains(f))
    }

    /// Checks that any fragment of `other` is present.
    #[must_use]
    pub fn contains_any(&self, other: &Self) -> bool {
        other.fragments.iter().any(|&f| self.contains(f))
    }

    /// This set plus `fragment`.
    #[must_use]
    pub fn with(&self, fragment: FragmentId) -> Self {
        let mut fragments = self.fragments.clone();
        if let Err(at) = fragments.binary_search(&fragment) {
            fragments.insert(at, fragment);
        }
        Self { fragments }
    }

    /// This set minus `fragment`.
    #[must_use]
    pub fn without(&self, fragment: FragmentId) -> Self {
        let mut fragments = self.fragments.clone();
        fragments.retain(|&f| f != fragment);
        Self { fragments }
    }

    /// Fragment ids, ascending.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[FragmentId] {
        &self.fragments
    }

    /// Returns the number of fragments in this signature.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Returns true if this signature has no fragments.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Schemas of an archetype's fragments, in signature order.
#[derive(Debug)]
pub struct ArchetypeLayout {
    signature: ArchetypeSignature,
    schemas: Vec<Arc<FragmentSchema>>,
    fragment_mask: u64,
    mirrored_mask: u64,
}

impl ArchetypeLayout {
    /// Pairs a signature with its schemas (same order, same length).
    #[must_use]
    pub fn new(signature: ArchetypeSignature, schemas: Vec<Arc<FragmentSchema>>) -> Self {
        debug_assert_eq!(signature.len(), schemas.len());
        let mut fragment_mask = 0;
        let mut mirrored_mask = 0;
        for (&id, schema) in signature.as_slice().iter().zip(&schemas) {
            fragment_mask |= id.bit();
            if schema.is_mirrored() {
                mirrored_mask |= id.bit();
            }
        }
        Self {
            signature,
            schemas,
            fragment_mask,
            mirrored_mask,
        }
    }

    /// Fragment set.
    #[inline]
    #[must_use]
    pub fn signature(&self) -> &ArchetypeSignature {
        &self.signature
    }

    /// Schemas in signature order.
    #[inline]
    #[must_use]
    pub fn schemas(&self) -> &[Arc<FragmentSchema>] {
        &self.schemas
    }

    /// Position of a fragment in the layout.
    #[inline]
    #[must_use]
    pub fn position(&self, fragment: FragmentId) -> Option<usize> {
        self.signature.fragments.binary_search(&fragment).ok()
    }

    /// Bits of every fragment in the layout.
    #[inline]
    #[must_use]
    pub const fn fragment_mask(&self) -> u64 {
        self.fragment_mask
    }

    /// Bits of the externally mirrored fragments.
    #[inline]
    #[must_use]
    pub const fn mirrored_mask(&self) -> u64 {
        self.mirrored_mask
    }
}

/// One planned piece of an entity's placement.
///
/// `chunk` may point past the current chunk list: those chunks are created
/// by [`Archetype::commit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PlannedSegment {
    pub chunk: u32,
    pub slot: u32,
    pub len: u32,
}

/// Placement computed without mutating the archetype.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SegmentPlan {
    pub pieces: Vec<PlannedSegment>,
}

/// Chunks of one fragment set.
#[derive(Debug)]
pub struct Archetype {
    id: ArchetypeId,
    layout: Arc<ArchetypeLayout>,
    chunks: Vec<Chunk>,
    /// Indices of chunks with at least one free slot, ascending.
    open_chunks: RandomAccessAllocator<u32>,
    chunk_capacity: usize,
}

impl Archetype {
    /// Creates an archetype with no chunks.
    #[must_use]
    pub fn new(id: ArchetypeId, layout: ArchetypeLayout, chunk_capacity: usize) -> Self {
        Self {
            id,
            layout: Arc::new(layout),
            chunks: Vec::new(),
            open_chunks: RandomAccessAllocator::new(0, Template::Prototype(0)),
            chunk_capacity,
        }
    }

    /// Archetype id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Fragment set.
    #[inline]
    #[must_use]
    pub fn signature(&self) -> &ArchetypeSignature {
        self.layout.signature()
    }

    /// Shared layout.
    #[inline]
    #[must_use]
    pub fn layout(&self) -> &Arc<ArchetypeLayout> {
        &self.layout
    }

    /// All chunks, in creation order.
    #[inline]
    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// All chunks, mutable.
    #[inline]
    pub fn chunks_mut(&mut self) -> &mut [Chunk] {
        &mut self.chunks
    }

    /// Chunk by index.
    #[inline]
    #[must_use]
    pub fn chunk(&self, index: u32) -> Option<&Chunk> {
        self.chunks.get(index as usize)
    }

    /// Mutable chunk by index.
    #[inline]
    pub fn chunk_mut(&mut self, index: u32) -> Option<&mut Chunk> {
        self.chunks.get_mut(index as usize)
    }

    /// Indices of chunks with free slots, ascending.
    #[inline]
    #[must_use]
    pub fn open_chunks(&self) -> &[u32] {
        self.open_chunks.as_slice()
    }

    /// Slots per fresh chunk.
    #[inline]
    #[must_use]
    pub const fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Number of live entities (head slots carrying ALIVE).
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.chunks
            .iter()
            .map(|chunk| {
                chunk
                    .flags()
                    .iter()
                    .enumerate()
                    .filter(|&(slot, f)| f.is_alive() && chunk.is_head(slot))
                    .count()
            })
            .sum()
    }

    /// Total free slots over every chunk.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.chunks.iter().map(Chunk::free_slots).sum()
    }

    /// Plans where `count` contiguous instances go. Nothing is mutated.
    ///
    /// 1. A single open chunk with a free run of `count`.
    /// 2. A new chunk, if `count` fits in one.
    /// 3. Spanning: empty chunks first, then new full chunks, then the
    ///    remainder in any chunk with a fitting run (or one more new chunk).
    ///
    /// # Errors
    ///
    /// [`StoreError::ChunkLimit`] if more than `max_chunks` chunks would exist.
    pub(crate) fn plan_segments(&self, count: u32, max_chunks: usize) -> StoreResult<SegmentPlan> {
        let count_slots = count as usize;
        let cap = self.chunk_capacity;

        for &index in self.open_chunks.as_slice() {
            if let Some(slot) = self.chunks[index as usize].find_free_run(count_slots) {
                return Ok(SegmentPlan {
                    pieces: vec![PlannedSegment {
                        chunk: index,
                        slot: slot as u32,
                        len: count,
                    }],
                });
            }
        }

        let mut next_new = self.chunks.len() as u32;
        let mut pieces = Vec::new();

        if count_slots <= cap {
            pieces.push(PlannedSegment {
                chunk: next_new,
                slot: 0,
                len: count,
            });
            next_new += 1;
        } else {
            let mut remaining = count_slots;
            let mut used = Vec::new();
            for &index in self.open_chunks.as_slice() {
                let chunk = &self.chunks[index as usize];
                if remaining >= cap && chunk.live_slots() == 0 && chunk.capacity() == cap {
                    pieces.push(PlannedSegment {
                        chunk: index,
                        slot: 0,
                        len: cap as u32,
                    });
                    used.push(index);
                    remaining -= cap;
                }
            }
            while remaining >= cap {
                pieces.push(PlannedSegment {
                    chunk: next_new,
                    slot: 0,
                    len: cap as u32,
                });
                next_new += 1;
                remaining -= cap;
            }
            if remaining > 0 {
                let fitting = self.open_chunks.as_slice().iter().find_map(|&index| {
                    if used.contains(&index) {
                        return None;
                    }
                    self.chunks[index as usize]
                        .find_free_run(remaining)
                        .map(|slot| (index, slot as u32))
                });
                let (chunk, slot) = fitting.unwrap_or_else(|| {
                    next_new += 1;
                    (next_new - 1, 0)
                });
                pieces.push(PlannedSegment {
                    chunk,
                    slot,
                    len: remaining as u32,
                });
            }
        }

        if next_new as usize > max_chunks {
            return Err(StoreError::ChunkLimit {
                archetype: self.id,
                limit: max_chunks,
            });
        }
        Ok(SegmentPlan { pieces })
    }

    /// Applies a plan from [`Self::plan_segments`], claiming slots for `owner`.
    pub(crate) fn commit(&mut self, plan: &SegmentPlan, owner: EntityId) -> Vec<Segment> {
        plan.pieces
            .iter()
            .enumerate()
            .map(|(i, piece)| {
                while self.chunks.len() <= piece.chunk as usize {
                    self.push_chunk();
                }
                let chunk = &mut self.chunks[piece.chunk as usize];
                if i == 0 {
                    chunk.occupy_head(piece.slot as usize, piece.len as usize, owner);
                } else {
                    chunk.occupy(piece.slot as usize, piece.len as usize, owner);
                }
                let segment = Segment {
                    chunk: chunk.chunk_ref(),
                    slot: piece.slot,
                    run_length: piece.len,
                };
                self.refresh_open(piece.chunk);
                segment
            })
            .collect()
    }

    /// Frees one segment's slots.
    pub(crate) fn release(&mut self, segment: Segment) {
        if let Some(chunk) = self.chunks.get_mut(segment.chunk.index as usize) {
            chunk.release(segment.slot as usize, segment.run_length as usize);
            self.refresh_open(segment.chunk.index);
        }
    }

    /// Claims `extra` slots right after `segment`, if they are free.
    pub(crate) fn try_extend(&mut self, segment: Segment, extra: u32) -> bool {
        let Some(chunk) = self.chunks.get_mut(segment.chunk.index as usize) else {
            return false;
        };
        let start = (segment.slot + segment.run_length) as usize;
        if !chunk.occupancy().is_range_clear(start, extra as usize) {
            return false;
        }
        let owner = chunk.owner(segment.slot as usize).unwrap_or(EntityId::NULL);
        chunk.occupy(start, extra as usize, owner);
        chunk.set_run_length(start, 0);
        chunk.set_run_length(segment.slot as usize, segment.run_length + extra);
        self.refresh_open(segment.chunk.index);
        true
    }

    /// Frees every slot of `segment` past the first `keep`.
    pub(crate) fn truncate(&mut self, segment: Segment, keep: u32) {
        if let Some(chunk) = self.chunks.get_mut(segment.chunk.index as usize) {
            let start = (segment.slot + keep) as usize;
            chunk.release(start, (segment.run_length - keep) as usize);
            chunk.set_run_length(segment.slot as usize, keep);
            self.refresh_open(segment.chunk.index);
        }
    }

    /// Creates empty chunks until at least `count` slots are free.
    ///
    /// # Errors
    ///
    /// [`StoreError::ChunkLimit`] if that needs more than `max_chunks` chunks.
    pub(crate) fn reserve(&mut self, count: usize, max_chunks: usize) -> StoreResult<()> {
        let free = self.free_slots();
        if free >= count {
            return Ok(());
        }
        let needed = (count - free).div_ceil(self.chunk_capacity);
        if self.chunks.len() + needed > max_chunks {
            return Err(StoreError::ChunkLimit {
                archetype: self.id,
                limit: max_chunks,
            });
        }
        for _ in 0..needed {
            self.push_chunk();
        }
        Ok(())
    }

    fn push_chunk(&mut self) {
        let index = self.chunks.len() as u32;
        let chunk_ref = ChunkRef {
            archetype: self.id,
            index,
        };
        let mut chunk = Chunk::new(chunk_ref, Arc::clone(&self.layout), self.chunk_capacity);
        chunk.mark_dirty();
        self.chunks.push(chunk);
        self.refresh_open(index);
        tracing::debug!(
            "Archetype {:?} created chunk {} ({} slots)",
            self.id,
            index,
            self.chunk_capacity
        );
    }

    /// Keeps `open_chunks` in sync with one chunk's free slots.
    fn refresh_open(&mut self, index: u32) {
        let has_free = self.chunks[index as usize].free_slots() > 0;
        let listed = self.open_chunks.as_slice().binary_search(&index);
        match (has_free, listed) {
            (true, Err(at)) => {
                let inserted = self.open_chunks.insert(at, index);
                debug_assert!(inserted.is_ok(), "binary_search position is within bounds");
            }
            (false, Ok(at)) => {
                let removed = self.open_chunks.deallocate_at(at);
                debug_assert!(removed.is_ok(), "binary_search hit is within bounds");
            }
            _ => {}
        }
    }

    /// Number of open chunks.
    #[inline]
    #[must_use]
    pub fn open_chunk_count(&self) -> usize {
        self.open_chunks.len()
    }
}
