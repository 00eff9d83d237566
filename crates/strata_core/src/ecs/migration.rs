//! # Migration
//!
//! Moves an entity between archetypes when its fragment set changes, and
//! between slot ranges when its instance count changes.
//!
//! Every fallible step (record validation, segment planning) runs before
//! the first mutation, so a failed migration leaves the entity where it was.
//!
//! ```text
//! plan dest segments ─► snapshot shared ─► release source ─► commit dest
//!                                                              │
//!        directory ◄── flags to new head ◄── scatter snapshot ◄┘
//! ```

use super::archetype::ArchetypeId;
use super::column::Column;
use super::directory::{EntityLocation, Segment};
use super::entity::{EntityFlags, EntityId};
use super::fragment::{FragmentData, FragmentId};
use super::world::World;
use crate::error::{StoreError, StoreResult};

impl World {
    /// Copies the first `limit` instances of one fragment across all
    /// segments, in instance order.
    pub(crate) fn snapshot(&self, location: &EntityLocation, fragment: FragmentId, limit: u32) -> Vec<Column> {
        let mut columns: Vec<Column> = Vec::new();
        let mut remaining = limit;
        for segment in &location.segments {
            if remaining == 0 {
                break;
            }
            let take = segment.run_length.min(remaining);
            let Some(piece) = self
                .chunk(segment.chunk)
                .and_then(|c| c.columns().read_fragment(fragment, segment.slot as usize, take as usize))
            else {
                break;
            };
            if columns.is_empty() {
                columns = piece;
            } else {
                for (acc, part) in columns.iter_mut().zip(&piece) {
                    acc.extend_from(part, 0..part.len());
                }
            }
            remaining -= take;
        }
        columns
    }

    /// Writes the first `limit` instances of a snapshot over `segments`.
    pub(crate) fn scatter(
        &mut self,
        segments: &[Segment],
        fragment: FragmentId,
        columns: &[Column],
        limit: u32,
    ) -> StoreResult<()> {
        if columns.is_empty() {
            return Ok(());
        }
        let mut offset = 0u32;
        for segment in segments {
            if offset == limit {
                break;
            }
            let take = segment.run_length.min(limit - offset);
            self.expect_chunk_mut(segment.chunk)?.columns_mut().write_fragment(
                fragment,
                segment.slot as usize,
                columns,
                offset as usize,
                take as usize,
            );
            offset += take;
        }
        Ok(())
    }

    /// Attaches a fragment to an entity, writing `data` to every instance.
    ///
    /// Migrates the entity to the archetype with the fragment added. If the
    /// entity already carries it, only the data is written. Unregistered
    /// fragments are logged and ignored.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownEntity`] for dead or stale ids
    /// - any validation error of `data`
    /// - [`StoreError::ChunkLimit`] if the destination archetype is full
    pub fn add_fragment(&mut self, entity: EntityId, data: FragmentData) -> StoreResult<()> {
        let fragment = data.fragment();
        let Some(schema) = self.registry.get(fragment) else {
            tracing::warn!("add_fragment: unregistered fragment {:?}, ignored", fragment);
            return Ok(());
        };
        schema.resolve(&data)?;

        let location = self
            .directory
            .get(entity)
            .cloned()
            .ok_or(StoreError::UnknownEntity(entity))?;
        let signature = self.archetypes[location.archetype.index()].signature();
        if signature.contains(fragment) {
            self.write_all_instances(&location, &data)?;
            self.head_flags_mut(entity)?.insert(EntityFlags::DIRTY);
            return Ok(());
        }

        let target = signature.with(fragment);
        let destination = self.archetype_for(target)?;
        let count = location.instance_count();
        self.migrate(entity, &location, destination, count, Some(&data))
    }

    /// Detaches a fragment from an entity.
    ///
    /// No-op if the entity lacks the fragment. Unregistered fragments are
    /// logged and ignored.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownEntity`] for dead or stale ids
    /// - [`StoreError::ChunkLimit`] if the destination archetype is full
    pub fn remove_fragment(&mut self, entity: EntityId, fragment: FragmentId) -> StoreResult<()> {
        if !self.registry.contains(fragment) {
            tracing::warn!("remove_fragment: unregistered fragment {:?}, ignored", fragment);
            return Ok(());
        }

        let location = self
            .directory
            .get(entity)
            .cloned()
            .ok_or(StoreError::UnknownEntity(entity))?;
        let signature = self.archetypes[location.archetype.index()].signature();
        if !signature.contains(fragment) {
            return Ok(());
        }

        let target = signature.without(fragment);
        let destination = self.archetype_for(target)?;
        let count = location.instance_count();
        self.migrate(entity, &location, destination, count, None)
    }

    /// Changes how many contiguous slots an entity occupies.
    ///
    /// The first `min(old, count)` instances keep their data; new instances
    /// start at field defaults. Shrinking frees the tail in place. Growing
    /// extends the last segment in place when the following slots are free,
    /// and relocates the entity inside its archetype otherwise.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidInstanceCount`] if `count` is zero
    /// - [`StoreError::UnknownEntity`] for dead or stale ids
    /// - [`StoreError::ChunkLimit`] if relocation needs too many chunks
    pub fn set_entity_instance_count(&mut self, entity: EntityId, count: u32) -> StoreResult<()> {
        if count == 0 {
            return Err(StoreError::InvalidInstanceCount(count));
        }
        let mut location = self
            .directory
            .get(entity)
            .cloned()
            .ok_or(StoreError::UnknownEntity(entity))?;
        let old = location.instance_count();
        let archetype = location.archetype;

        if count == old {
            return Ok(());
        }

        if count < old {
            let arch = &mut self.archetypes[archetype.index()];
            let mut kept = 0u32;
            let mut segments = Vec::with_capacity(location.segments.len());
            for &segment in &location.segments {
                let keep = segment.run_length.min(count - kept);
                if keep == 0 {
                    arch.release(segment);
                } else {
                    if keep < segment.run_length {
                        arch.truncate(segment, keep);
                    }
                    segments.push(Segment {
                        run_length: keep,
                        ..segment
                    });
                }
                kept += keep;
            }
            location.segments = segments;
            tracing::trace!("Shrank {:?} from {} to {} instances", entity, old, count);
            self.directory.set(entity, location);
            self.touch_structure(archetype);
            return Ok(());
        }

        let extra = count - old;
        let last = location.segments.len() - 1;
        if self.archetypes[archetype.index()].try_extend(location.segments[last], extra) {
            location.segments[last].run_length += extra;
            tracing::trace!("Grew {:?} in place from {} to {} instances", entity, old, count);
            self.directory.set(entity, location);
            self.touch_structure(archetype);
            return Ok(());
        }

        self.migrate(entity, &location, archetype, count, None)
    }

    /// Moves `entity` from `source` into `destination` with `count` instances.
    ///
    /// Fragments present in both archetypes keep the first `min(old, count)`
    /// instances; fragments only in the destination start at defaults and
    /// then receive `data`.
    fn migrate(
        &mut self,
        entity: EntityId,
        source: &EntityLocation,
        destination: ArchetypeId,
        count: u32,
        data: Option<&FragmentData>,
    ) -> StoreResult<()> {
        let max_chunks = self.config.max_chunks_per_archetype;
        let plan = self.archetypes[destination.index()].plan_segments(count, max_chunks)?;

        let kept = source.instance_count().min(count);
        let source_signature = self.archetypes[source.archetype.index()].signature().clone();
        let shared: Vec<FragmentId> = self.archetypes[destination.index()]
            .signature()
            .as_slice()
            .iter()
            .copied()
            .filter(|&f| source_signature.contains(f))
            .collect();
        let snapshots: Vec<(FragmentId, Vec<Column>)> = shared
            .iter()
            .map(|&f| (f, self.snapshot(source, f, kept)))
            .collect();
        let (head_chunk, head_slot) = source.head();
        let flags = self
            .chunk(head_chunk)
            .map_or(EntityFlags::ALIVE, |c| c.flags()[head_slot]);

        // Past this point nothing can fail short of a broken directory.
        let source_arch = &mut self.archetypes[source.archetype.index()];
        for &segment in &source.segments {
            source_arch.release(segment);
        }

        let segments = self.archetypes[destination.index()].commit(&plan, entity);
        for (fragment, columns) in &snapshots {
            self.scatter(&segments, *fragment, columns, kept)?;
        }
        let location = EntityLocation {
            archetype: destination,
            segments,
        };
        if let Some(data) = data {
            self.write_all_instances(&location, data)?;
        }
        let (head_chunk, head_slot) = location.head();
        self.expect_chunk_mut(head_chunk)?.flags_mut()[head_slot] = flags | EntityFlags::ALIVE;

        tracing::trace!(
            "Migrated {:?} from {:?} to {:?} ({} instances, {} segments)",
            entity,
            source.archetype,
            destination,
            count,
            location.segments.len()
        );
        self.directory.set(entity, location);
        self.touch_structure(source.archetype);
        self.touch_structure(destination);
        Ok(())
    }
}
