//! # World
//!
//! The owned container for one entity store: fragment registry, archetypes
//! and their chunks, entity directory, queries, deferred commands and the
//! external-sync state. Several worlds may coexist in one process.
//!
//! ## Frame Model
//!
//! ```text
//! structural mutation  ->  iteration / processing  ->  external sync
//!        |                                               |
//!        +------------------ end_frame() ----------------+
//! ```
//!
//! All mutation takes `&mut self`; the world holds no locks.

use std::collections::HashMap;

use super::accessor::FieldAccessor;
use super::archetype::{Archetype, ArchetypeId, ArchetypeLayout, ArchetypeSignature};
use super::chunk::{Chunk, ChunkRef};
use super::column::Column;
use super::commands::CommandBuffer;
use super::directory::{EntityDirectory, EntityLocation};
use super::entity::{EntityFlags, EntityId};
use super::fragment::{FragmentData, FragmentId, FragmentRegistry, FragmentSchema};
use super::query::QueryState;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::memory::{FreeListAllocator, Pool, RingAllocator, Template};
use crate::sync::{ExternalMirror, SyncCounters, SyncStats};

/// An entity store.
///
/// # Example
///
/// ```rust,ignore
/// let mut world = World::new(StoreConfig::default())?;
/// let ids = world.register_builtins()?;
///
/// let entity = world.create_entity()?;
/// world.add_fragment(entity, FragmentData::new(ids.transform))?;
/// world.set_entity_instance_count(entity, 16)?;
/// ```
#[derive(Debug)]
pub struct World {
    pub(crate) config: StoreConfig,
    pub(crate) registry: FragmentRegistry,
    pub(crate) archetypes: Vec<Archetype>,
    pub(crate) archetype_lookup: HashMap<ArchetypeSignature, ArchetypeId>,
    pub(crate) directory: EntityDirectory,
    pub(crate) queries: FreeListAllocator<Option<QueryState>>,
    pub(crate) query_serial: u32,
    pub(crate) commands: CommandBuffer,
    /// Accessor rings, one per fragment.
    pub(crate) views: Vec<RingAllocator<Option<FieldAccessor>>>,
    pub(crate) view_serial: u64,
    /// External buffer state, one per fragment.
    pub(crate) mirrors: Vec<ExternalMirror>,
    pub(crate) last_sync: Option<SyncStats>,
    pub(crate) sync_counters: SyncCounters,
    /// Bumped by every structural change and every frame end.
    pub(crate) epoch: u64,
    frame: u64,
}

impl Default for World {
    fn default() -> Self {
        Self::build(StoreConfig::default())
    }
}

impl World {
    /// Creates an empty world containing only the root archetype.
    ///
    /// # Errors
    ///
    /// [`StoreError::Config`] if the config fails validation.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: StoreConfig) -> Self {
        let root = Archetype::new(
            ArchetypeId::ROOT,
            ArchetypeLayout::new(ArchetypeSignature::empty(), Vec::new()),
            config.chunk_capacity,
        );
        let mut archetype_lookup = HashMap::new();
        archetype_lookup.insert(ArchetypeSignature::empty(), ArchetypeId::ROOT);

        Self {
            queries: FreeListAllocator::new(config.max_queries, &Template::Prototype(None)),
            commands: CommandBuffer::new(config.command_capacity),
            config,
            registry: FragmentRegistry::new(),
            archetypes: vec![root],
            archetype_lookup,
            directory: EntityDirectory::new(),
            query_serial: 0,
            views: Vec::new(),
            view_serial: 0,
            mirrors: Vec::new(),
            last_sync: None,
            sync_counters: SyncCounters::default(),
            epoch: 0,
            frame: 0,
        }
    }

    /// Active configuration.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Fragment registry.
    #[inline]
    #[must_use]
    pub const fn registry(&self) -> &FragmentRegistry {
        &self.registry
    }

    /// Frames ended so far.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Returns the number of live entities.
    #[inline]
    #[must_use]
    pub const fn entity_count(&self) -> usize {
        self.directory.len()
    }

    /// Checks if an entity is alive.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.directory.contains(entity)
    }

    /// Location of a live entity.
    #[inline]
    #[must_use]
    pub fn location(&self, entity: EntityId) -> Option<&EntityLocation> {
        self.directory.get(entity)
    }

    /// Live entities and their locations.
    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &EntityLocation)> {
        self.directory.iter()
    }

    // =========================================================================
    // Fragments and archetypes
    // =========================================================================

    /// Registers a fragment type (idempotent for an identical schema).
    ///
    /// # Errors
    ///
    /// See [`FragmentRegistry::register`].
    pub fn register_fragment(&mut self, schema: FragmentSchema) -> StoreResult<FragmentId> {
        let view_capacity = schema.view_capacity();
        let id = self.registry.register(schema)?;
        if id.index() == self.views.len() {
            self.views
                .push(RingAllocator::frame_scoped(view_capacity, &Template::Prototype(None)));
            self.mirrors.push(ExternalMirror::default());
            tracing::debug!("Registered fragment {:?}", id);
        }
        Ok(id)
    }

    /// Archetype by id.
    #[inline]
    #[must_use]
    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.index())
    }

    /// All archetypes, in id order.
    #[inline]
    #[must_use]
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Id of the archetype with exactly these fragments, if it exists.
    #[must_use]
    pub fn find_archetype(&self, signature: &ArchetypeSignature) -> Option<ArchetypeId> {
        self.archetype_lookup.get(signature).copied()
    }

    /// Returns the archetype for `signature`, creating it if needed.
    pub(crate) fn archetype_for(&mut self, signature: ArchetypeSignature) -> StoreResult<ArchetypeId> {
        if let Some(&id) = self.archetype_lookup.get(&signature) {
            return Ok(id);
        }

        let schemas = signature
            .as_slice()
            .iter()
            .map(|&f| self.registry.get(f).cloned().ok_or(StoreError::UnknownFragment(f)))
            .collect::<StoreResult<Vec<_>>>()?;

        let id = ArchetypeId::new(self.archetypes.len() as u32);
        tracing::debug!("Created archetype {:?} for {:?}", id, signature.as_slice());
        let layout = ArchetypeLayout::new(signature.clone(), schemas);
        self.archetypes
            .push(Archetype::new(id, layout, self.config.chunk_capacity));
        self.archetype_lookup.insert(signature, id);
        Ok(id)
    }

    /// Chunk by address.
    #[must_use]
    pub fn chunk(&self, chunk: ChunkRef) -> Option<&Chunk> {
        self.archetypes.get(chunk.archetype.index())?.chunk(chunk.index)
    }

    /// Mutable chunk by address.
    pub fn chunk_mut(&mut self, chunk: ChunkRef) -> Option<&mut Chunk> {
        self.archetypes
            .get_mut(chunk.archetype.index())?
            .chunk_mut(chunk.index)
    }

    pub(crate) fn expect_chunk_mut(&mut self, chunk: ChunkRef) -> StoreResult<&mut Chunk> {
        self.chunk_mut(chunk)
            .ok_or_else(|| StoreError::Inconsistent(format!("missing chunk {chunk:?}")))
    }

    /// Records a structural change to `archetype`: accessors go stale and the
    /// external buffers of its mirrored fragments must be rebuilt.
    pub(crate) fn touch_structure(&mut self, archetype: ArchetypeId) {
        self.epoch += 1;
        if let Some(arch) = self.archetypes.get(archetype.index()) {
            for &fragment in arch.signature().as_slice() {
                if let Some(mirror) = self.mirrors.get_mut(fragment.index()) {
                    mirror.stale = true;
                }
            }
        }
    }

    // =========================================================================
    // Entity lifecycle
    // =========================================================================

    /// Creates an entity with no fragments and one instance.
    ///
    /// # Errors
    ///
    /// [`StoreError::ChunkLimit`] if the root archetype is full.
    pub fn create_entity(&mut self) -> StoreResult<EntityId> {
        self.spawn_in(ArchetypeId::ROOT, 1, &[])
    }

    /// Creates an entity directly in the archetype of `fragments`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownFragment`] for unregistered fragments
    /// - any validation error of the records
    /// - [`StoreError::ChunkLimit`] if the archetype is full
    pub fn spawn(&mut self, fragments: &[FragmentData]) -> StoreResult<EntityId> {
        for data in fragments {
            let schema = self
                .registry
                .get(data.fragment())
                .ok_or(StoreError::UnknownFragment(data.fragment()))?;
            schema.resolve(data)?;
        }
        let signature = ArchetypeSignature::new(fragments.iter().map(FragmentData::fragment).collect());
        let archetype = self.archetype_for(signature)?;
        self.spawn_in(archetype, 1, fragments)
    }

    /// Places a new entity of `count` instances. Records must be pre-validated.
    pub(crate) fn spawn_in(
        &mut self,
        archetype: ArchetypeId,
        count: u32,
        fragments: &[FragmentData],
    ) -> StoreResult<EntityId> {
        let max_chunks = self.config.max_chunks_per_archetype;
        let arch = &mut self.archetypes[archetype.index()];
        let plan = arch.plan_segments(count, max_chunks)?;

        let owner = self.directory.peek_next();
        let segments = arch.commit(&plan, owner);
        let location = EntityLocation {
            archetype,
            segments,
        };

        for data in fragments {
            self.write_all_instances(&location, data)?;
        }
        let (head_chunk, head_slot) = location.head();
        self.expect_chunk_mut(head_chunk)?.flags_mut()[head_slot] =
            EntityFlags::ALIVE | EntityFlags::DIRTY;

        let id = self.directory.insert(location);
        debug_assert_eq!(id, owner);
        self.touch_structure(archetype);
        Ok(id)
    }

    /// Writes `data` to every instance of an entity. `data` must be valid.
    pub(crate) fn write_all_instances(
        &mut self,
        location: &EntityLocation,
        data: &FragmentData,
    ) -> StoreResult<()> {
        for segment in &location.segments {
            let chunk = self.expect_chunk_mut(segment.chunk)?;
            let start = segment.slot as usize;
            for slot in start..start + segment.run_length as usize {
                chunk.write_instance(slot, data)?;
            }
        }
        Ok(())
    }

    /// Deletes an entity immediately, freeing all its slots.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownEntity`] for dead or stale ids.
    pub fn delete_entity(&mut self, entity: EntityId) -> StoreResult<()> {
        let location = self
            .directory
            .remove(entity)
            .ok_or(StoreError::UnknownEntity(entity))?;
        let arch = &mut self.archetypes[location.archetype.index()];
        for &segment in &location.segments {
            arch.release(segment);
        }
        self.touch_structure(location.archetype);
        Ok(())
    }

    /// Flags an entity for deletion at the next frame boundary.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownEntity`] for dead or stale ids.
    pub fn mark_for_deletion(&mut self, entity: EntityId) -> StoreResult<()> {
        self.head_flags_mut(entity)?.insert(EntityFlags::PENDING_DELETE);
        Ok(())
    }

    /// Deletes every entity flagged with PENDING_DELETE. Returns how many.
    pub fn process_pending_deletes(&mut self) -> usize {
        let pending: Vec<EntityId> = self
            .directory
            .iter()
            .filter(|(_, location)| {
                let (chunk, slot) = location.head();
                self.chunk(chunk)
                    .is_some_and(|c| c.flags()[slot].contains(EntityFlags::PENDING_DELETE))
            })
            .map(|(id, _)| id)
            .collect();

        for &entity in &pending {
            if let Err(err) = self.delete_entity(entity) {
                tracing::warn!("Pending delete of {:?} failed: {}", entity, err);
            }
        }
        pending.len()
    }

    /// Copies an entity: same fragments, instance count, data and flags.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownEntity`] for dead or stale ids
    /// - [`StoreError::ChunkLimit`] if the archetype is full
    pub fn duplicate_entity(&mut self, entity: EntityId) -> StoreResult<EntityId> {
        let source = self
            .directory
            .get(entity)
            .cloned()
            .ok_or(StoreError::UnknownEntity(entity))?;
        let count = source.instance_count();
        let archetype = source.archetype;
        let arch = &self.archetypes[archetype.index()];
        let plan = arch.plan_segments(count, self.config.max_chunks_per_archetype)?;

        let fragments = arch.signature().as_slice().to_vec();
        let snapshots: Vec<(FragmentId, Vec<Column>)> = fragments
            .iter()
            .map(|&f| (f, self.snapshot(&source, f, count)))
            .collect();
        let (src_chunk, src_slot) = source.head();
        let flags = self
            .chunk(src_chunk)
            .map_or(EntityFlags::ALIVE, |c| c.flags()[src_slot]);

        let owner = self.directory.peek_next();
        let segments = self.archetypes[archetype.index()].commit(&plan, owner);
        for (fragment, columns) in &snapshots {
            self.scatter(&segments, *fragment, columns, count)?;
        }
        let location = EntityLocation {
            archetype,
            segments,
        };
        let (head_chunk, head_slot) = location.head();
        self.expect_chunk_mut(head_chunk)?.flags_mut()[head_slot] =
            flags.without(EntityFlags::PENDING_DELETE) | EntityFlags::ALIVE | EntityFlags::DIRTY;

        let id = self.directory.insert(location);
        debug_assert_eq!(id, owner);
        self.touch_structure(archetype);
        Ok(id)
    }

    /// Pre-creates root-archetype chunks for `count` more entities.
    ///
    /// # Errors
    ///
    /// [`StoreError::ChunkLimit`] if that exceeds the chunk limit.
    pub fn reserve_entities(&mut self, count: usize) -> StoreResult<()> {
        let max_chunks = self.config.max_chunks_per_archetype;
        self.archetypes[ArchetypeId::ROOT.index()].reserve(count, max_chunks)
    }

    /// Pre-creates chunks for `count` more instances with exactly `fragments`.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownFragment`] or [`StoreError::ChunkLimit`].
    pub fn reserve_in(&mut self, fragments: &[FragmentId], count: usize) -> StoreResult<ArchetypeId> {
        let archetype = self.archetype_for(ArchetypeSignature::new(fragments.to_vec()))?;
        let max_chunks = self.config.max_chunks_per_archetype;
        self.archetypes[archetype.index()].reserve(count, max_chunks)?;
        Ok(archetype)
    }

    // =========================================================================
    // Flags
    // =========================================================================

    pub(crate) fn head_flags_mut(&mut self, entity: EntityId) -> StoreResult<&mut EntityFlags> {
        let (chunk, slot) = self
            .directory
            .get(entity)
            .ok_or(StoreError::UnknownEntity(entity))?
            .head();
        Ok(&mut self.expect_chunk_mut(chunk)?.flags_mut()[slot])
    }

    /// Logical flags of an entity.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownEntity`] for dead or stale ids.
    pub fn get_entity_flags(&self, entity: EntityId) -> StoreResult<EntityFlags> {
        let (chunk, slot) = self
            .directory
            .get(entity)
            .ok_or(StoreError::UnknownEntity(entity))?
            .head();
        self.chunk(chunk)
            .map(|c| c.flags()[slot])
            .ok_or_else(|| StoreError::Inconsistent(format!("missing chunk {chunk:?}")))
    }

    /// Sets the bits of `flags` on an entity.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownEntity`] for dead or stale ids.
    pub fn set_entity_flags(&mut self, entity: EntityId, flags: EntityFlags) -> StoreResult<()> {
        self.head_flags_mut(entity)?.insert(flags);
        Ok(())
    }

    /// Clears the bits of `flags` on an entity.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownEntity`] for dead or stale ids.
    pub fn clear_entity_flags(&mut self, entity: EntityId, flags: EntityFlags) -> StoreResult<()> {
        self.head_flags_mut(entity)?.remove(flags);
        Ok(())
    }

    // =========================================================================
    // Data
    // =========================================================================

    /// Checks `entity` is live and carries `fragment`.
    pub(crate) fn attached(&self, entity: EntityId, fragment: FragmentId) -> StoreResult<&EntityLocation> {
        let location = self
            .directory
            .get(entity)
            .ok_or(StoreError::UnknownEntity(entity))?;
        if self.archetypes[location.archetype.index()]
            .signature()
            .contains(fragment)
        {
            Ok(location)
        } else {
            Err(StoreError::FragmentNotAttached {
                entity,
                fragment: self.fragment_name(fragment),
            })
        }
    }

    pub(crate) fn fragment_name(&self, fragment: FragmentId) -> String {
        self.registry
            .get(fragment)
            .map_or_else(|| format!("{fragment:?}"), |s| s.name().to_owned())
    }

    /// Writes instance 0 of an entity and marks it ALIVE | DIRTY.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownEntity`] / [`StoreError::FragmentNotAttached`]
    /// - any validation error of `data` (nothing is written then)
    pub fn update_entity_data(&mut self, entity: EntityId, data: &FragmentData) -> StoreResult<()> {
        let (chunk, slot) = self.attached(entity, data.fragment())?.head();
        self.expect_chunk_mut(chunk)?.update_entity_data(slot, data)
    }

    /// Writes one instance of an entity and marks the entity DIRTY.
    ///
    /// # Errors
    ///
    /// As [`Self::update_entity_data`], plus
    /// [`StoreError::InstanceOutOfRange`].
    pub fn update_instance_data(
        &mut self,
        entity: EntityId,
        instance: u32,
        data: &FragmentData,
    ) -> StoreResult<()> {
        let location = self.attached(entity, data.fragment())?;
        let count = location.instance_count();
        let (chunk, slot) = location
            .instance(instance)
            .ok_or(StoreError::InstanceOutOfRange {
                entity,
                index: instance,
                count,
            })?;
        self.expect_chunk_mut(chunk)?.write_instance(slot, data)?;
        self.head_flags_mut(entity)?.insert(EntityFlags::DIRTY);
        Ok(())
    }

    /// Writes `data` to every instance of an entity.
    ///
    /// # Errors
    ///
    /// As [`Self::update_entity_data`].
    pub fn update_all_instances(&mut self, entity: EntityId, data: &FragmentData) -> StoreResult<()> {
        let location = self.attached(entity, data.fragment())?.clone();
        if let Some(schema) = self.registry.get(data.fragment()) {
            schema.resolve(data)?;
        }
        self.write_all_instances(&location, data)?;
        self.head_flags_mut(entity)?.insert(EntityFlags::DIRTY);
        Ok(())
    }

    /// Copy of one field of one instance.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownEntity`] / [`StoreError::FragmentNotAttached`]
    /// - [`StoreError::InstanceOutOfRange`]
    /// - [`StoreError::UnknownField`]
    pub fn get_field(
        &self,
        entity: EntityId,
        instance: u32,
        fragment: FragmentId,
        field: &str,
    ) -> StoreResult<Column> {
        let location = self.attached(entity, fragment)?;
        let (chunk, slot) = location
            .instance(instance)
            .ok_or(StoreError::InstanceOutOfRange {
                entity,
                index: instance,
                count: location.instance_count(),
            })?;
        let view = self
            .chunk(chunk)
            .and_then(|c| c.get_fragment_view(fragment))
            .ok_or_else(|| StoreError::Inconsistent(format!("missing chunk {chunk:?}")))?;
        let unknown = || StoreError::UnknownField {
            fragment: view.schema().name().to_owned(),
            field: field.to_owned(),
        };
        let index = view.schema().field_index(field).ok_or_else(unknown)?;
        let count = view.schema().fields()[index].count();
        let column = view.field(field).ok_or_else(unknown)?;
        Ok(column.slice(slot * count..(slot + 1) * count))
    }

    /// Checks whether an entity carries a fragment.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownEntity`] for dead or stale ids.
    pub fn has_fragment(&self, entity: EntityId, fragment: FragmentId) -> StoreResult<bool> {
        let location = self
            .directory
            .get(entity)
            .ok_or(StoreError::UnknownEntity(entity))?;
        Ok(self.archetypes[location.archetype.index()]
            .signature()
            .contains(fragment))
    }

    /// Fragments of an entity.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownEntity`] for dead or stale ids.
    pub fn fragments_of(&self, entity: EntityId) -> StoreResult<&ArchetypeSignature> {
        let location = self
            .directory
            .get(entity)
            .ok_or(StoreError::UnknownEntity(entity))?;
        Ok(self.archetypes[location.archetype.index()].signature())
    }

    /// Number of instances of an entity.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownEntity`] for dead or stale ids.
    pub fn get_entity_instance_count(&self, entity: EntityId) -> StoreResult<u32> {
        self.directory
            .get(entity)
            .map(EntityLocation::instance_count)
            .ok_or(StoreError::UnknownEntity(entity))
    }

    /// Entity owning a chunk slot.
    #[must_use]
    pub fn get_entity_for(&self, chunk: ChunkRef, slot: usize) -> Option<EntityId> {
        self.chunk(chunk)?.owner(slot)
    }

    // =========================================================================
    // Frame
    // =========================================================================

    /// Frame boundary: pending deletes, then deferred commands, then query
    /// revalidation. Accessors issued this frame become stale.
    pub fn end_frame(&mut self) {
        let deleted = self.process_pending_deletes();
        let applied = self.apply_deferred();
        self.process_query_changes();
        for ring in &mut self.views {
            ring.reset();
        }
        self.epoch += 1;
        self.frame += 1;
        tracing::trace!(
            "Frame {} ended: {} deleted, {} commands applied",
            self.frame,
            deleted,
            applied
        );
    }

    /// Checks that the directory and chunk occupancy agree.
    ///
    /// Every segment must be occupied by its entity with a matching run
    /// length, every entity's first slot must be ALIVE, and the occupied
    /// slot total must equal the instance total (no orphan slots).
    ///
    /// # Errors
    ///
    /// [`StoreError::Inconsistent`] describing the first violation.
    pub fn validate(&self) -> StoreResult<()> {
        let fail = |msg: String| Err(StoreError::Inconsistent(msg));
        let mut instances = 0usize;

        for (entity, location) in self.directory.iter() {
            if location.segments.is_empty() {
                return fail(format!("{entity:?} has no segments"));
            }
            for segment in &location.segments {
                if segment.chunk.archetype != location.archetype {
                    return fail(format!("{entity:?} segment outside its archetype"));
                }
                let Some(chunk) = self.chunk(segment.chunk) else {
                    return fail(format!("{entity:?} points at missing {:?}", segment.chunk));
                };
                let start = segment.slot as usize;
                if chunk.run_lengths().get(start).copied() != Some(segment.run_length) {
                    return fail(format!("{entity:?} run length mismatch at {start}"));
                }
                for slot in start..start + segment.run_length as usize {
                    if chunk.owner(slot) != Some(entity) {
                        return fail(format!("{entity:?} does not own slot {slot} of {:?}", segment.chunk));
                    }
                }
            }
            let (chunk, slot) = location.head();
            if !self.chunk(chunk).is_some_and(|c| c.is_head(slot) && c.flags()[slot].is_alive()) {
                return fail(format!("{entity:?} head slot is not ALIVE"));
            }
            instances += location.instance_count() as usize;
        }

        let occupied: usize = self
            .archetypes
            .iter()
            .flat_map(Archetype::chunks)
            .map(Chunk::live_slots)
            .sum();
        if occupied != instances {
            return fail(format!("{occupied} occupied slots for {instances} instances"));
        }
        Ok(())
    }
}
