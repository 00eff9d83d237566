//! # Queries
//!
//! A query caches the archetypes whose fragment set contains every include
//! fragment and none of the exclude fragments. The cache is refreshed once
//! per frame by [`World::process_query_changes`]; archetypes created in
//! between are not visited until then.
//!
//! ```rust,ignore
//! let moving = world.create_query(&QueryDescriptor::new(vec![transform, velocity]))?;
//! world.for_each(moving, |chunk, slot, instances, _| {
//!     // per entity, first slot only
//! })?;
//! ```

use super::archetype::{Archetype, ArchetypeId, ArchetypeSignature};
use super::chunk::{Chunk, ChunkColumns};
use super::commands::CommandBuffer;
use super::directory::EntityDirectory;
use super::entity::EntityFlags;
use super::fragment::FragmentId;
use super::world::World;
use crate::error::{StoreError, StoreResult};
use crate::memory::{FreeListHandle, Pool};

/// Fragment filter of a query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryDescriptor {
    /// Fragments every match must carry.
    pub include: Vec<FragmentId>,
    /// Fragments no match may carry.
    pub exclude: Vec<FragmentId>,
}

impl QueryDescriptor {
    /// Filter on `include` with no exclusions.
    #[must_use]
    pub fn new(include: Vec<FragmentId>) -> Self {
        Self {
            include,
            exclude: Vec::new(),
        }
    }

    /// Adds exclusions.
    #[must_use]
    pub fn excluding(mut self, exclude: Vec<FragmentId>) -> Self {
        self.exclude = exclude;
        self
    }

    fn check(&self) -> StoreResult<()> {
        if self.include.is_empty() {
            return Err(StoreError::InvalidQuery("include set is empty".into()));
        }
        for (name, list) in [("include", &self.include), ("exclude", &self.exclude)] {
            for (i, f) in list.iter().enumerate() {
                if list[..i].contains(f) {
                    return Err(StoreError::InvalidQuery(format!("{f:?} listed twice in {name}")));
                }
            }
        }
        if let Some(f) = self.include.iter().find(|f| self.exclude.contains(f)) {
            return Err(StoreError::InvalidQuery(format!(
                "{f:?} is both included and excluded"
            )));
        }
        Ok(())
    }
}

/// Handle to a live query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueryHandle {
    slot: FreeListHandle,
    serial: u32,
}

/// Cached state of one query.
#[derive(Clone, Debug)]
pub(crate) struct QueryState {
    serial: u32,
    include: ArchetypeSignature,
    exclude: ArchetypeSignature,
    /// `false` when the filter names an unregistered fragment.
    satisfiable: bool,
    matched: Vec<ArchetypeId>,
}

impl QueryState {
    fn matches(&self, signature: &ArchetypeSignature) -> bool {
        self.satisfiable && signature.contains_all(&self.include) && !signature.contains_any(&self.exclude)
    }

    fn refresh(&mut self, archetypes: &[Archetype]) {
        self.matched.clear();
        if !self.satisfiable {
            return;
        }
        let matched: Vec<ArchetypeId> = archetypes
            .iter()
            .filter(|arch| self.matches(arch.signature()))
            .map(Archetype::id)
            .collect();
        self.matched = matched;
    }
}

/// Visits the first slot of every live entity in `matched`, ascending.
fn visit_entities<F>(archetypes: &mut [Archetype], directory: &EntityDirectory, matched: &[ArchetypeId], mut visit: F)
where
    F: FnMut(&mut Chunk, usize, u32, &ArchetypeSignature),
{
    for &id in matched {
        let arch = &mut archetypes[id.index()];
        let signature = arch.signature().clone();
        for chunk in arch.chunks_mut() {
            if chunk.live_slots() == 0 {
                continue;
            }
            for slot in 0..chunk.capacity() {
                if !chunk.is_head(slot) || !chunk.flags()[slot].contains(EntityFlags::ALIVE) {
                    continue;
                }
                let instances = chunk
                    .owner(slot)
                    .and_then(|owner| directory.get(owner))
                    .map_or(1, |location| location.instance_count());
                visit(chunk, slot, instances, &signature);
            }
        }
    }
}

impl World {
    /// Creates a query.
    ///
    /// Unregistered fragments make the query match nothing (logged, not an
    /// error).
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidQuery`] for an empty include set, duplicates,
    ///   or a fragment both included and excluded
    /// - [`crate::AllocError::OutOfMemory`] when every query slot is in use
    pub fn create_query(&mut self, descriptor: &QueryDescriptor) -> StoreResult<QueryHandle> {
        descriptor.check()?;

        let unknown: Vec<FragmentId> = descriptor
            .include
            .iter()
            .chain(&descriptor.exclude)
            .copied()
            .filter(|&f| !self.registry.contains(f))
            .collect();
        if !unknown.is_empty() {
            tracing::warn!("Query names unregistered fragments {:?}; it will match nothing", unknown);
        }

        self.query_serial = self.query_serial.wrapping_add(1);
        let mut state = QueryState {
            serial: self.query_serial,
            include: ArchetypeSignature::new(descriptor.include.clone()),
            exclude: ArchetypeSignature::new(descriptor.exclude.clone()),
            satisfiable: unknown.is_empty(),
            matched: Vec::new(),
        };
        state.refresh(&self.archetypes);

        let slot = self.queries.insert(Some(state))?;
        Ok(QueryHandle {
            slot,
            serial: self.query_serial,
        })
    }

    /// Shorthand for a query with no exclusions.
    ///
    /// # Errors
    ///
    /// As [`Self::create_query`].
    pub fn create_query_for(&mut self, include: &[FragmentId]) -> StoreResult<QueryHandle> {
        self.create_query(&QueryDescriptor::new(include.to_vec()))
    }

    /// Destroys a query, freeing its slot.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownQuery`] if the handle is not live.
    pub fn destroy_query(&mut self, handle: QueryHandle) -> StoreResult<()> {
        self.query_state(handle)?;
        if let Some(state) = self.queries.get_mut(handle.slot) {
            *state = None;
        }
        self.queries.deallocate(handle.slot)?;
        Ok(())
    }

    fn query_state(&self, handle: QueryHandle) -> StoreResult<&QueryState> {
        self.queries
            .get(handle.slot)
            .and_then(Option::as_ref)
            .filter(|state| state.serial == handle.serial)
            .ok_or(StoreError::UnknownQuery)
    }

    /// Refreshes every live query against the current archetype list.
    pub fn process_query_changes(&mut self) {
        let archetypes = &self.archetypes;
        for (_, state) in self.queries.iter_mut() {
            if let Some(state) = state {
                state.refresh(archetypes);
            }
        }
    }

    /// Live query count.
    #[inline]
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    /// Archetypes matched as of the last refresh.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownQuery`] if the handle is not live.
    pub fn matched_archetypes(&self, handle: QueryHandle) -> StoreResult<&[ArchetypeId]> {
        Ok(&self.query_state(handle)?.matched)
    }

    /// Live entities in the matched archetypes.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownQuery`] if the handle is not live.
    pub fn matched_entity_count(&self, handle: QueryHandle) -> StoreResult<usize> {
        Ok(self
            .query_state(handle)?
            .matched
            .iter()
            .map(|id| self.archetypes[id.index()].entity_count())
            .sum())
    }

    /// Calls `visit(chunk, slot, instance_count, signature)` once per live
    /// entity, on the slot holding its flags.
    ///
    /// Field data may be changed through `chunk`; structural changes go
    /// through [`Self::for_each_with_commands`] or [`Self::defer`].
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownQuery`] if the handle is not live.
    pub fn for_each<F>(&mut self, handle: QueryHandle, visit: F) -> StoreResult<()>
    where
        F: FnMut(&mut Chunk, usize, u32, &ArchetypeSignature),
    {
        self.query_state(handle)?;
        let Some(Some(state)) = self.queries.get(handle.slot) else {
            return Err(StoreError::UnknownQuery);
        };
        visit_entities(&mut self.archetypes, &self.directory, &state.matched, visit);
        Ok(())
    }

    /// Like [`Self::for_each`], with the world's deferred command buffer.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownQuery`] if the handle is not live.
    pub fn for_each_with_commands<F>(&mut self, handle: QueryHandle, mut visit: F) -> StoreResult<()>
    where
        F: FnMut(&mut Chunk, usize, u32, &ArchetypeSignature, &mut CommandBuffer),
    {
        self.query_state(handle)?;
        let Some(Some(state)) = self.queries.get(handle.slot) else {
            return Err(StoreError::UnknownQuery);
        };
        let commands = &mut self.commands;
        visit_entities(
            &mut self.archetypes,
            &self.directory,
            &state.matched,
            |chunk, slot, instances, signature| visit(chunk, slot, instances, signature, commands),
        );
        Ok(())
    }

    /// Calls `visit(columns, flags, run_lengths, signature)` once per
    /// matched chunk holding at least one occupied slot.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownQuery`] if the handle is not live.
    pub fn for_each_chunk<F>(&mut self, handle: QueryHandle, mut visit: F) -> StoreResult<()>
    where
        F: FnMut(&mut ChunkColumns, &mut [EntityFlags], &[u32], &ArchetypeSignature),
    {
        self.query_state(handle)?;
        let Some(Some(state)) = self.queries.get(handle.slot) else {
            return Err(StoreError::UnknownQuery);
        };
        for &id in &state.matched {
            let arch = &mut self.archetypes[id.index()];
            let signature = arch.signature().clone();
            for chunk in arch.chunks_mut() {
                if chunk.live_slots() == 0 {
                    continue;
                }
                let (columns, flags, run_lengths) = chunk.split_mut();
                visit(columns, flags, run_lengths, &signature);
            }
        }
        Ok(())
    }
}
