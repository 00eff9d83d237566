//! # External Buffer Bridge
//!
//! Packs the mirrored fields of a fragment into one contiguous byte buffer
//! owned by an [`ExternalBufferSink`] (a GPU device, a staging area, a
//! file).
//!
//! ## Packing Order
//!
//! ```text
//! archetype (id order) -> chunk (index order) -> active slot (ascending)
//!     per slot: mirrored fields in declaration order, tightly packed
//! ```
//!
//! A slot is active when its entity's head slot carries ALIVE. Records
//! cleared with [`Chunk::remove_entity`] keep their slots but are skipped,
//! so the buffer tracks the active count, not chunk capacity.
//!
//! ## Update Policy
//!
//! ```text
//! no handle yet / layout changed (stale) -> pack everything
//!     bigger than the buffer             -> rebuild (create + release old)
//!     fits                               -> upload at offset 0
//! same layout, some chunks dirty         -> upload only those chunks' bytes
//!     (a chunk whose active count moved counts as a layout change)
//! nothing changed                        -> return the handle, pack nothing
//! ```
//!
//! Structural changes (spawn, delete, migration) mark every fragment of the
//! touched archetype stale; field writes only set chunk dirty bits.

use std::collections::HashSet;

use crate::ecs::{Chunk, EntityId, FragmentId, UsageMask, World};
use crate::error::StoreResult;

/// Opaque id of a buffer owned by an [`ExternalBufferSink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalHandle(pub u64);

/// Result of a sync: the buffer and how many bytes of it are valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExternalData {
    /// Buffer holding the packed data.
    pub handle: ExternalHandle,
    /// Valid bytes from offset 0.
    pub byte_length: usize,
}

/// Parameters of a buffer to create.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Fragment name, for debugging.
    pub label: String,
    /// Fragment the buffer mirrors.
    pub fragment: FragmentId,
    /// Usage declared by the fragment schema.
    pub usage: UsageMask,
    /// Buffer size in bytes.
    pub capacity: usize,
    /// Bytes per packed slot.
    pub stride: usize,
}

/// Receiver of packed fragment data.
pub trait ExternalBufferSink {
    /// Creates a buffer of `descriptor.capacity` bytes starting with `bytes`.
    fn create_buffer(&mut self, descriptor: &BufferDescriptor, bytes: &[u8]) -> ExternalHandle;

    /// Overwrites `bytes.len()` bytes of a buffer starting at `offset`.
    fn update_buffer(&mut self, handle: ExternalHandle, offset: usize, bytes: &[u8]);

    /// Drops a buffer replaced by a rebuild.
    fn release_buffer(&mut self, _handle: ExternalHandle) {}
}

/// What a sync did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncAction {
    /// Nothing changed; nothing was packed.
    Skipped,
    /// A new buffer was created.
    Rebuilt,
    /// The existing buffer was updated in place.
    Patched,
}

/// Statistics of one [`World::to_external_data`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncStats {
    /// The fragment synced.
    pub fragment: FragmentId,
    /// What happened.
    pub action: SyncAction,
    /// Slots packed.
    pub packed_slots: usize,
    /// Bytes per packed slot.
    pub bytes_per_slot: usize,
    /// Chunks whose bytes were uploaded.
    pub dirty_chunks: usize,
    /// Chunks holding the fragment.
    pub total_chunks: usize,
    /// Bytes of a full upload.
    pub full_copy_bytes: usize,
    /// Bytes actually uploaded.
    pub uploaded_bytes: usize,
}

impl SyncStats {
    /// Returns the bandwidth saved by partial upload (0.0 to 1.0).
    #[must_use]
    pub fn bandwidth_savings(&self) -> f32 {
        if self.full_copy_bytes == 0 {
            0.0
        } else {
            1.0 - (self.uploaded_bytes as f32 / self.full_copy_bytes as f32)
        }
    }

    /// Returns `true` when nothing was packed or uploaded.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.packed_slots == 0 && self.uploaded_bytes == 0
    }
}

/// Running totals over every sync of a world.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncCounters {
    /// Buffers created.
    pub rebuilds: u64,
    /// In-place updates.
    pub patches: u64,
    /// Syncs that found nothing to do.
    pub skips: u64,
}

/// Per-fragment external buffer state.
#[derive(Debug, Default)]
pub(crate) struct ExternalMirror {
    /// Slot layout changed since the last pack.
    pub(crate) stale: bool,
    handle: Option<ExternalHandle>,
    capacity: usize,
    byte_length: usize,
    /// Active slots per chunk at the last pack.
    layout: Vec<usize>,
    scratch: Vec<u8>,
}

/// Owners whose head slot, somewhere in `chunks`, carries ALIVE.
fn active_owners(chunks: &[&mut Chunk]) -> HashSet<EntityId> {
    let mut owners = HashSet::new();
    for chunk in chunks {
        for slot in chunk.occupancy().iter_set() {
            if chunk.is_head(slot) && chunk.flags()[slot].is_alive() {
                owners.extend(chunk.owner(slot));
            }
        }
    }
    owners
}

/// Segments of `chunk` owned by active entities, as `(start, len)`.
fn active_runs<'a>(
    chunk: &'a Chunk,
    active: &'a HashSet<EntityId>,
) -> impl Iterator<Item = (usize, usize)> + 'a {
    chunk.occupancy().iter_set().filter_map(move |slot| {
        let len = chunk.run_lengths()[slot] as usize;
        let owner = chunk.owner(slot)?;
        (len > 0 && active.contains(&owner)).then_some((slot, len))
    })
}

fn pack_chunk(chunk: &Chunk, fragment: FragmentId, active: &HashSet<EntityId>, out: &mut Vec<u8>) -> usize {
    let mut packed = 0;
    for (start, len) in active_runs(chunk, active) {
        for slot in start..start + len {
            chunk.columns().pack_slot(fragment, slot, out);
        }
        packed += len;
    }
    packed
}

impl World {
    /// Brings the external buffer of `fragment` up to date.
    ///
    /// Returns `None` (after a warning) for unregistered fragments and
    /// fragments without mirrored fields. The outcome is reported by
    /// [`Self::last_sync_stats`].
    ///
    /// # Errors
    ///
    /// None today; reserved for sinks that can fail.
    pub fn to_external_data(
        &mut self,
        fragment: FragmentId,
        sink: &mut impl ExternalBufferSink,
    ) -> StoreResult<Option<ExternalData>> {
        let Some(schema) = self.registry.get(fragment).cloned() else {
            tracing::warn!("Sync of unregistered fragment {:?} ignored", fragment);
            return Ok(None);
        };
        if !schema.is_mirrored() {
            tracing::warn!("Fragment `{}` has no mirrored fields; nothing to sync", schema.name());
            return Ok(None);
        }
        let stride = schema.mirrored_stride();
        let min_capacity = self.config.external_min_capacity;
        let Some(mirror) = self.mirrors.get_mut(fragment.index()) else {
            return Ok(None);
        };

        let chunks: Vec<&mut Chunk> = self
            .archetypes
            .iter_mut()
            .filter(|arch| arch.signature().contains(fragment))
            .flat_map(|arch| arch.chunks_mut().iter_mut())
            .collect();
        let active = active_owners(&chunks);
        let layout: Vec<usize> = chunks
            .iter()
            .map(|c| active_runs(c, &active).map(|(_, len)| len).sum())
            .collect();
        let total_slots: usize = layout.iter().sum();
        let dirty = chunks.iter().filter(|c| c.is_fragment_dirty(fragment)).count();
        let stale = mirror.stale || mirror.layout != layout;

        let mut stats = SyncStats {
            fragment,
            action: SyncAction::Skipped,
            packed_slots: 0,
            bytes_per_slot: stride,
            dirty_chunks: 0,
            total_chunks: chunks.len(),
            full_copy_bytes: total_slots * stride,
            uploaded_bytes: 0,
        };

        let mut scratch = std::mem::take(&mut mirror.scratch);
        scratch.clear();

        let current = mirror.handle;
        match current {
            Some(handle) if !stale && dirty == 0 => {
                self.sync_counters.skips += 1;
                mirror.scratch = scratch;
                self.last_sync = Some(stats);
                return Ok(Some(ExternalData {
                    handle,
                    byte_length: mirror.byte_length,
                }));
            }
            Some(handle) if !stale => {
                // Layout unchanged: chunk byte offsets are those of the last pack.
                let mut offset = 0;
                for (chunk, &slots) in chunks.iter().zip(&layout) {
                    let bytes = slots * stride;
                    if slots > 0 && chunk.is_fragment_dirty(fragment) {
                        scratch.clear();
                        stats.packed_slots += pack_chunk(chunk, fragment, &active, &mut scratch);
                        sink.update_buffer(handle, offset, &scratch);
                        stats.uploaded_bytes += scratch.len();
                        stats.dirty_chunks += 1;
                    }
                    offset += bytes;
                }
                stats.action = SyncAction::Patched;
                self.sync_counters.patches += 1;
            }
            previous => {
                for chunk in &chunks {
                    stats.packed_slots += pack_chunk(chunk, fragment, &active, &mut scratch);
                }
                stats.dirty_chunks = dirty;
                stats.uploaded_bytes = scratch.len();
                match previous {
                    Some(handle) if scratch.len() <= mirror.capacity => {
                        sink.update_buffer(handle, 0, &scratch);
                        stats.action = SyncAction::Patched;
                        self.sync_counters.patches += 1;
                    }
                    _ => {
                        let capacity = scratch.len().next_power_of_two().max(min_capacity);
                        let descriptor = BufferDescriptor {
                            label: schema.name().to_owned(),
                            fragment,
                            usage: schema.usage(),
                            capacity,
                            stride,
                        };
                        let handle = sink.create_buffer(&descriptor, &scratch);
                        if let Some(old) = previous {
                            sink.release_buffer(old);
                        }
                        tracing::debug!(
                            "Rebuilt external buffer for `{}`: {} bytes, capacity {}",
                            schema.name(),
                            scratch.len(),
                            capacity
                        );
                        mirror.handle = Some(handle);
                        mirror.capacity = capacity;
                        stats.action = SyncAction::Rebuilt;
                        self.sync_counters.rebuilds += 1;
                    }
                }
                mirror.byte_length = scratch.len();
            }
        }

        for chunk in chunks {
            chunk.columns_mut().clear_fragment_dirty(fragment);
        }
        mirror.stale = false;
        mirror.layout = layout;
        mirror.scratch = scratch;
        self.last_sync = Some(stats);

        Ok(mirror.handle.map(|handle| ExternalData {
            handle,
            byte_length: mirror.byte_length,
        }))
    }

    /// Syncs every mirrored fragment, in id order.
    ///
    /// # Errors
    ///
    /// As [`Self::to_external_data`].
    pub fn sync_all(
        &mut self,
        sink: &mut impl ExternalBufferSink,
    ) -> StoreResult<Vec<(FragmentId, ExternalData)>> {
        let mirrored: Vec<FragmentId> = self
            .registry
            .iter()
            .filter(|(_, schema)| schema.is_mirrored())
            .map(|(id, _)| id)
            .collect();
        let mut synced = Vec::with_capacity(mirrored.len());
        for fragment in mirrored {
            if let Some(data) = self.to_external_data(fragment, sink)? {
                synced.push((fragment, data));
            }
        }
        Ok(synced)
    }

    /// Statistics of the most recent sync.
    #[inline]
    #[must_use]
    pub const fn last_sync_stats(&self) -> Option<&SyncStats> {
        self.last_sync.as_ref()
    }

    /// Totals over every sync so far.
    #[inline]
    #[must_use]
    pub const fn sync_counters(&self) -> SyncCounters {
        self.sync_counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::ecs::{FieldDef, FragmentData, FragmentSchema, ScalarKind};

    /// Records every call.
    #[derive(Default)]
    struct RecordingSink {
        buffers: Vec<Vec<u8>>,
        updates: Vec<(ExternalHandle, usize, usize)>,
        released: Vec<ExternalHandle>,
    }

    impl ExternalBufferSink for RecordingSink {
        fn create_buffer(&mut self, descriptor: &BufferDescriptor, bytes: &[u8]) -> ExternalHandle {
            let mut buffer = vec![0; descriptor.capacity];
            buffer[..bytes.len()].copy_from_slice(bytes);
            self.buffers.push(buffer);
            ExternalHandle(self.buffers.len() as u64 - 1)
        }

        fn update_buffer(&mut self, handle: ExternalHandle, offset: usize, bytes: &[u8]) {
            self.buffers[handle.0 as usize][offset..offset + bytes.len()].copy_from_slice(bytes);
            self.updates.push((handle, offset, bytes.len()));
        }

        fn release_buffer(&mut self, handle: ExternalHandle) {
            self.released.push(handle);
        }
    }

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn world() -> (World, FragmentId, FragmentId) {
        let mut world = World::new(StoreConfig {
            chunk_capacity: 2,
            external_min_capacity: 16,
            ..StoreConfig::default()
        })
        .unwrap();
        let position = world
            .register_fragment(
                FragmentSchema::builder("position")
                    .field(FieldDef::new("xy", ScalarKind::F32, 2).mirrored())
                    .field(FieldDef::new("cpu_only", ScalarKind::U32, 1))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let tag = world
            .register_fragment(
                FragmentSchema::builder("tag")
                    .field(FieldDef::new("id", ScalarKind::U32, 1))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        (world, position, tag)
    }

    fn spawn_at(world: &mut World, position: FragmentId, x: f32) -> crate::ecs::EntityId {
        world
            .spawn(&[FragmentData::new(position).with("xy", [x, x + 0.5])])
            .unwrap()
    }

    #[test]
    fn test_first_sync_rebuilds_then_skips() {
        let (mut world, position, _) = world();
        for x in [1.0, 2.0, 3.0] {
            spawn_at(&mut world, position, x);
        }
        let mut sink = RecordingSink::default();

        let data = world.to_external_data(position, &mut sink).unwrap().unwrap();
        assert_eq!(data.byte_length, 3 * 8);
        let stats = *world.last_sync_stats().unwrap();
        assert_eq!(stats.action, SyncAction::Rebuilt);
        assert_eq!(stats.packed_slots, 3);
        assert_eq!(sink.buffers[0].len(), 32);
        assert_eq!(
            floats(&sink.buffers[0][..24]),
            vec![1.0, 1.5, 2.0, 2.5, 3.0, 3.5]
        );

        let again = world.to_external_data(position, &mut sink).unwrap().unwrap();
        assert_eq!(again, data);
        assert!(world.last_sync_stats().unwrap().is_noop());
        assert_eq!(world.sync_counters().skips, 1);
    }

    #[test]
    fn test_field_write_patches_only_dirty_chunk() {
        let (mut world, position, _) = world();
        let entities: Vec<_> = [1.0, 2.0, 3.0]
            .into_iter()
            .map(|x| spawn_at(&mut world, position, x))
            .collect();
        let mut sink = RecordingSink::default();
        world.to_external_data(position, &mut sink).unwrap();

        let data = FragmentData::new(position).with("xy", [9.0f32, 9.5]);
        world.update_entity_data(entities[2], &data).unwrap();
        world.to_external_data(position, &mut sink).unwrap();

        let stats = *world.last_sync_stats().unwrap();
        assert_eq!(stats.action, SyncAction::Patched);
        assert_eq!((stats.dirty_chunks, stats.total_chunks), (1, 2));
        assert_eq!(stats.uploaded_bytes, 8);
        assert!(stats.bandwidth_savings() > 0.6);
        assert_eq!(sink.updates, vec![(ExternalHandle(0), 16, 8)]);
        assert_eq!(floats(&sink.buffers[0][16..24]), vec![9.0, 9.5]);
    }

    #[test]
    fn test_structural_change_repacks_and_grows() {
        let (mut world, position, _) = world();
        let first = spawn_at(&mut world, position, 1.0);
        spawn_at(&mut world, position, 2.0);
        let mut sink = RecordingSink::default();
        world.to_external_data(position, &mut sink).unwrap();

        // Shrinks: fits, uploaded in place.
        world.delete_entity(first).unwrap();
        let data = world.to_external_data(position, &mut sink).unwrap().unwrap();
        assert_eq!(data.byte_length, 8);
        assert_eq!(world.last_sync_stats().unwrap().action, SyncAction::Patched);
        assert_eq!(floats(&sink.buffers[0][..8]), vec![2.0, 2.5]);

        // Grows past 16 bytes: new buffer, old one released.
        for x in [3.0, 4.0] {
            spawn_at(&mut world, position, x);
        }
        let data = world.to_external_data(position, &mut sink).unwrap().unwrap();
        assert_eq!(data.byte_length, 24);
        assert_eq!(data.handle, ExternalHandle(1));
        assert_eq!(sink.released, vec![ExternalHandle(0)]);
        assert_eq!(sink.buffers[1].len(), 32);
        assert_eq!(world.sync_counters().rebuilds, 2);
    }

    #[test]
    fn test_unmirrored_and_unknown_are_noops() {
        let (mut world, position, tag) = world();
        spawn_at(&mut world, position, 1.0);
        let mut sink = RecordingSink::default();
        assert!(world.to_external_data(tag, &mut sink).unwrap().is_none());
        assert!(world
            .to_external_data(FragmentId::new(40), &mut sink)
            .unwrap()
            .is_none());
        assert!(sink.buffers.is_empty());

        let synced = world.sync_all(&mut sink).unwrap();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].0, position);
    }

    #[test]
    fn test_removed_record_left_out_of_buffer() {
        let (mut world, position, _) = world();
        let first = spawn_at(&mut world, position, 1.0);
        spawn_at(&mut world, position, 2.0);
        let mut sink = RecordingSink::default();
        world.to_external_data(position, &mut sink).unwrap();

        let (chunk, slot) = world.location(first).unwrap().head();
        world.chunk_mut(chunk).unwrap().remove_entity(slot).unwrap();

        let data = world.to_external_data(position, &mut sink).unwrap().unwrap();
        assert_eq!(data.byte_length, 8);
        assert_eq!(world.last_sync_stats().unwrap().packed_slots, 1);
        assert_eq!(floats(&sink.buffers[0][..8]), vec![2.0, 2.5]);
    }

    #[test]
    fn test_instances_across_chunks_all_packed() {
        let (mut world, position, _) = world();
        let e = spawn_at(&mut world, position, 1.0);
        world.set_entity_instance_count(e, 3).unwrap();
        let mut sink = RecordingSink::default();

        let data = world.to_external_data(position, &mut sink).unwrap().unwrap();
        assert_eq!(data.byte_length, 3 * 8);
        assert_eq!(world.last_sync_stats().unwrap().packed_slots, 3);
    }

    #[test]
    fn test_empty_dirty_chunk_not_uploaded() {
        let (mut world, position, _) = world();
        spawn_at(&mut world, position, 1.0);
        spawn_at(&mut world, position, 2.0);
        let last = spawn_at(&mut world, position, 3.0);
        let archetype = world.location(last).unwrap().archetype;
        world.delete_entity(last).unwrap();
        let mut sink = RecordingSink::default();
        world.to_external_data(position, &mut sink).unwrap();

        let empty = crate::ecs::ChunkRef { archetype, index: 1 };
        assert_eq!(world.chunk(empty).unwrap().live_slots(), 0);
        world.chunk_mut(empty).unwrap().mark_dirty();
        world.to_external_data(position, &mut sink).unwrap();

        let stats = *world.last_sync_stats().unwrap();
        assert_eq!(stats.action, SyncAction::Patched);
        assert_eq!(stats.dirty_chunks, 0);
        assert!(sink.updates.is_empty());
        assert!(!world.chunk(empty).unwrap().is_dirty());
    }
}
