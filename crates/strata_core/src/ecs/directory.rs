//! # Entity Directory
//!
//! Maps entity ids to their storage location. Indices are recycled through
//! a free list; the generation counter rejects stale ids.

use super::archetype::ArchetypeId;
use super::chunk::ChunkRef;
use super::entity::EntityId;

/// A contiguous run of slots in one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Segment {
    /// Chunk holding the run.
    pub chunk: ChunkRef,
    /// First slot of the run.
    pub slot: u32,
    /// Number of slots.
    pub run_length: u32,
}

/// Where an entity's instances live.
///
/// Run lengths sum to the instance count. A single-instance entity has one
/// segment of length 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityLocation {
    /// Owning archetype.
    pub archetype: ArchetypeId,
    /// Segments in instance order.
    pub segments: Vec<Segment>,
}

impl EntityLocation {
    /// Total instances.
    #[must_use]
    pub fn instance_count(&self) -> u32 {
        self.segments.iter().map(|s| s.run_length).sum()
    }

    /// Chunk and slot holding the entity's flags.
    #[inline]
    #[must_use]
    pub fn head(&self) -> (ChunkRef, usize) {
        let first = self.segments[0];
        (first.chunk, first.slot as usize)
    }

    /// Chunk and slot of instance `index`.
    #[must_use]
    pub fn instance(&self, index: u32) -> Option<(ChunkRef, usize)> {
        let mut remaining = index;
        for segment in &self.segments {
            if remaining < segment.run_length {
                return Some((segment.chunk, (segment.slot + remaining) as usize));
            }
            remaining -= segment.run_length;
        }
        None
    }
}

#[derive(Debug, Default)]
struct DirectoryEntry {
    generation: u32,
    location: Option<EntityLocation>,
}

/// Generation-checked table of entity locations.
#[derive(Debug, Default)]
pub struct EntityDirectory {
    entries: Vec<DirectoryEntry>,
    /// Free list of indices for reuse.
    free_indices: Vec<u32>,
    alive: usize,
}

impl EntityDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live entities.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.alive
    }

    /// Returns `true` when no entity is live.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.alive == 0
    }

    /// Registers a new entity at `location`.
    pub(crate) fn insert(&mut self, location: EntityLocation) -> EntityId {
        let index = match self.free_indices.pop() {
            Some(index) => index,
            None => {
                self.entries.push(DirectoryEntry::default());
                (self.entries.len() - 1) as u32
            }
        };

        let entry = &mut self.entries[index as usize];
        // Increment generation to invalidate old references
        entry.generation = entry.generation.wrapping_add(1);
        entry.location = Some(location);
        self.alive += 1;

        EntityId::new(index, entry.generation)
    }

    /// Id the next [`Self::insert`] will hand out.
    #[must_use]
    pub(crate) fn peek_next(&self) -> EntityId {
        match self.free_indices.last() {
            Some(&index) => EntityId::new(
                index,
                self.entries[index as usize].generation.wrapping_add(1),
            ),
            None => EntityId::new(self.entries.len() as u32, 1),
        }
    }

    /// Removes an entity, returning its last location.
    pub(crate) fn remove(&mut self, id: EntityId) -> Option<EntityLocation> {
        let entry = self.entry_mut(id)?;
        let location = entry.location.take()?;
        self.alive -= 1;
        self.free_indices.push(id.index());
        Some(location)
    }

    /// Checks if an entity is alive.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Location of a live entity.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&EntityLocation> {
        if id.is_null() {
            return None;
        }
        let entry = self.entries.get(id.index() as usize)?;
        if entry.generation != id.generation() {
            return None;
        }
        entry.location.as_ref()
    }

    /// Replaces a live entity's location.
    pub(crate) fn set(&mut self, id: EntityId, location: EntityLocation) {
        if let Some(entry) = self.entry_mut(id) {
            if entry.location.is_some() {
                entry.location = Some(location);
            }
        }
    }

    fn entry_mut(&mut self, id: EntityId) -> Option<&mut DirectoryEntry> {
        if id.is_null() {
            return None;
        }
        self.entries
            .get_mut(id.index() as usize)
            .filter(|entry| entry.generation == id.generation())
    }

    /// Iterates over live entities and their locations.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &EntityLocation)> {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            entry
                .location
                .as_ref()
                .map(|location| (EntityId::new(index as u32, entry.generation), location))
        })
    }
}
