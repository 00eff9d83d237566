//! # Chunks
//!
//! A chunk is a fixed-capacity structure-of-arrays block holding one column
//! per field of every fragment in its archetype.
//!
//! ```text
//! Chunk (archetype {transform, light}, capacity 4):
//!   occupancy   [1 1 1 0]
//!   flags       [A|D  0  A  0]        <- A = ALIVE, D = DIRTY
//!   run_lengths [2  0  1  0]          <- entity 0 spans slots 0..2
//!   owners      [e0 e0 e1 -]
//!   transform.position [p0 p0' p1 --]
//!   light.color        [c0 c0' c1 --]
//! ```
//!
//! Free slots always hold field defaults, so claiming a slot never needs
//! a separate initialisation pass.

use std::sync::Arc;

use super::archetype::{ArchetypeId, ArchetypeLayout, ArchetypeSignature};
use super::bitmap::SlotBitmap;
use super::column::Column;
use super::entity::{EntityFlags, EntityId};
use super::fragment::{FragmentData, FragmentId, FragmentSchema};
use crate::error::{AllocError, StoreError, StoreResult};

/// Address of a chunk: owning archetype plus index in its chunk list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkRef {
    /// Owning archetype.
    pub archetype: ArchetypeId,
    /// Index in the archetype's chunk list.
    pub index: u32,
}

/// Field storage of a chunk, plus its dirty state.
///
/// Split from [`Chunk`] so per-chunk visitors can mutate data while
/// reading slot bookkeeping.
#[derive(Debug)]
pub struct ChunkColumns {
    layout: Arc<ArchetypeLayout>,
    capacity: usize,
    /// `fragments[p][f]`: field `f` of the `p`-th fragment of the layout.
    fragments: Vec<Vec<Column>>,
    dirty: bool,
    /// One bit per [`FragmentId`] written since the last sync of that fragment.
    dirty_mask: u64,
}

impl ChunkColumns {
    fn new(layout: Arc<ArchetypeLayout>, capacity: usize) -> Self {
        let fragments = layout
            .schemas()
            .iter()
            .map(|schema| {
                schema
                    .fields()
                    .iter()
                    .map(|field| Column::filled(field.default_value(), capacity * field.count()))
                    .collect()
            })
            .collect();
        Self {
            layout,
            capacity,
            fragments,
            dirty: false,
            dirty_mask: 0,
        }
    }

    /// Slot count.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fragment set of the owning archetype.
    #[inline]
    #[must_use]
    pub fn signature(&self) -> &ArchetypeSignature {
        self.layout.signature()
    }

    /// Read-only view of one fragment's fields.
    #[must_use]
    pub fn get_fragment_view(&self, fragment: FragmentId) -> Option<FragmentView<'_>> {
        let position = self.layout.position(fragment)?;
        Some(FragmentView {
            schema: &self.layout.schemas()[position],
            columns: &self.fragments[position],
        })
    }

    /// Mutable view of one fragment's fields.
    ///
    /// Writes through the view are not tracked; call [`Self::mark_dirty`]
    /// or [`Self::mark_fragment_dirty`] afterwards.
    pub fn get_fragment_view_mut(&mut self, fragment: FragmentId) -> Option<FragmentViewMut<'_>> {
        let position = self.layout.position(fragment)?;
        Some(FragmentViewMut {
            schema: &self.layout.schemas()[position],
            columns: &mut self.fragments[position],
        })
    }

    /// Flags every fragment of the chunk as changed.
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.dirty_mask |= self.layout.fragment_mask();
    }

    /// Flags one fragment as changed.
    #[inline]
    pub fn mark_fragment_dirty(&mut self, fragment: FragmentId) {
        if self.layout.position(fragment).is_some() {
            self.dirty = true;
            self.dirty_mask |= fragment.bit();
        }
    }

    /// Clears the chunk flag and every fragment bit.
    #[inline]
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
        self.dirty_mask = 0;
    }

    /// Clears one fragment bit. The chunk flag drops once no mirrored
    /// fragment is left dirty.
    pub fn clear_fragment_dirty(&mut self, fragment: FragmentId) {
        self.dirty_mask &= !fragment.bit();
        if self.dirty_mask & self.layout.mirrored_mask() == 0 {
            self.clear_dirty();
        }
    }

    /// Data changed since the last sync or [`Self::clear_dirty`].
    #[inline]
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// One fragment changed since its last sync.
    #[inline]
    #[must_use]
    pub const fn is_fragment_dirty(&self, fragment: FragmentId) -> bool {
        self.dirty_mask & fragment.bit() != 0
    }

    /// One column by fragment and field position.
    #[must_use]
    pub fn column(&self, fragment: FragmentId, field: usize) -> Option<&Column> {
        let position = self.layout.position(fragment)?;
        self.fragments[position].get(field)
    }

    /// Mutable column by fragment and field position.
    pub fn column_mut(&mut self, fragment: FragmentId, field: usize) -> Option<&mut Column> {
        let position = self.layout.position(fragment)?;
        self.fragments[position].get_mut(field)
    }

    /// Checks `data` against the fragment schema. Nothing is written.
    pub(crate) fn resolve(&self, data: &FragmentData) -> StoreResult<Vec<usize>> {
        let position = self
            .layout
            .position(data.fragment())
            .ok_or(StoreError::UnknownFragment(data.fragment()))?;
        self.layout.schemas()[position].resolve(data)
    }

    /// Writes a record already checked by [`Self::resolve`].
    pub(crate) fn write_resolved(&mut self, slot: usize, data: &FragmentData, fields: &[usize]) {
        let Some(position) = self.layout.position(data.fragment()) else {
            return;
        };
        let schema = &self.layout.schemas()[position];
        for ((_, value), &field) in data.values().iter().zip(fields) {
            let def = &schema.fields()[field];
            let start = slot * def.count();
            let column = &mut self.fragments[position][field];
            column.copy_from(start, value, 0..value.len());
            // Short variable-length writes: the tail goes back to default.
            if value.len() < def.count() {
                column.fill(start + value.len()..start + def.count(), def.default_value());
            }
        }
        self.mark_fragment_dirty(data.fragment());
    }

    /// Copies `len` slots of one fragment starting at `slot`.
    pub(crate) fn read_fragment(&self, fragment: FragmentId, slot: usize, len: usize) -> Option<Vec<Column>> {
        let position = self.layout.position(fragment)?;
        let schema = &self.layout.schemas()[position];
        Some(
            self.fragments[position]
                .iter()
                .zip(schema.fields())
                .map(|(column, def)| column.slice(slot * def.count()..(slot + len) * def.count()))
                .collect(),
        )
    }

    /// Writes `len` slots of one fragment from `source`, starting at slot
    /// `from` of the source columns.
    pub(crate) fn write_fragment(
        &mut self,
        fragment: FragmentId,
        slot: usize,
        source: &[Column],
        from: usize,
        len: usize,
    ) {
        let Some(position) = self.layout.position(fragment) else {
            return;
        };
        let schema = &self.layout.schemas()[position];
        for ((column, def), src) in self.fragments[position]
            .iter_mut()
            .zip(schema.fields())
            .zip(source)
        {
            let count = def.count();
            column.copy_from(slot * count, src, from * count..(from + len) * count);
        }
        self.mark_fragment_dirty(fragment);
    }

    /// Writes defaults over `slot..slot + len` of every field.
    fn reset_slots(&mut self, slot: usize, len: usize) {
        for (columns, schema) in self.fragments.iter_mut().zip(self.layout.schemas()) {
            for (column, def) in columns.iter_mut().zip(schema.fields()) {
                let count = def.count();
                column.fill(slot * count..(slot + len) * count, def.default_value());
            }
        }
    }

    fn resize(&mut self, capacity: usize) {
        for (columns, schema) in self.fragments.iter_mut().zip(self.layout.schemas()) {
            for (column, def) in columns.iter_mut().zip(schema.fields()) {
                column.resize(capacity * def.count(), def.default_value());
            }
        }
        self.capacity = capacity;
    }

    /// Appends the mirrored fields of `slot` to `out`, in declaration order.
    pub(crate) fn pack_slot(&self, fragment: FragmentId, slot: usize, out: &mut Vec<u8>) {
        let Some(position) = self.layout.position(fragment) else {
            return;
        };
        let schema = &self.layout.schemas()[position];
        for (column, def) in self.fragments[position].iter().zip(schema.fields()) {
            if def.is_mirrored() {
                let count = def.count();
                out.extend_from_slice(column.bytes(slot * count..(slot + 1) * count));
            }
        }
    }
}

/// Read-only field access for one fragment of one chunk.
#[derive(Clone, Copy, Debug)]
pub struct FragmentView<'a> {
    schema: &'a FragmentSchema,
    columns: &'a [Column],
}

impl<'a> FragmentView<'a> {
    /// Fragment schema.
    #[inline]
    #[must_use]
    pub fn schema(&self) -> &'a FragmentSchema {
        self.schema
    }

    /// Column of a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&'a Column> {
        self.columns.get(self.schema.field_index(name)?)
    }

    /// `f32` column of a field by name.
    #[must_use]
    pub fn f32s(&self, name: &str) -> Option<&'a [f32]> {
        self.field(name)?.as_f32()
    }

    /// `u32` column of a field by name.
    #[must_use]
    pub fn u32s(&self, name: &str) -> Option<&'a [u32]> {
        self.field(name)?.as_u32()
    }

    /// `i32` column of a field by name.
    #[must_use]
    pub fn i32s(&self, name: &str) -> Option<&'a [i32]> {
        self.field(name)?.as_i32()
    }

    /// `u8` column of a field by name.
    #[must_use]
    pub fn u8s(&self, name: &str) -> Option<&'a [u8]> {
        self.field(name)?.as_u8()
    }
}

/// Mutable field access for one fragment of one chunk.
#[derive(Debug)]
pub struct FragmentViewMut<'a> {
    schema: &'a FragmentSchema,
    columns: &'a mut [Column],
}

impl FragmentViewMut<'_> {
    /// Fragment schema.
    #[inline]
    #[must_use]
    pub fn schema(&self) -> &FragmentSchema {
        self.schema
    }

    /// Column of a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Column> {
        self.columns.get(self.schema.field_index(name)?)
    }

    /// Mutable column of a field by name.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut Column> {
        let index = self.schema.field_index(name)?;
        self.columns.get_mut(index)
    }

    /// Mutable `f32` column of a field by name.
    pub fn f32s_mut(&mut self, name: &str) -> Option<&mut [f32]> {
        self.field_mut(name)?.as_f32_mut()
    }

    /// Mutable `u32` column of a field by name.
    pub fn u32s_mut(&mut self, name: &str) -> Option<&mut [u32]> {
        self.field_mut(name)?.as_u32_mut()
    }

    /// Mutable `i32` column of a field by name.
    pub fn i32s_mut(&mut self, name: &str) -> Option<&mut [i32]> {
        self.field_mut(name)?.as_i32_mut()
    }

    /// Mutable `u8` column of a field by name.
    pub fn u8s_mut(&mut self, name: &str) -> Option<&mut [u8]> {
        self.field_mut(name)?.as_u8_mut()
    }
}

/// A fixed-capacity SoA block of one archetype.
#[derive(Debug)]
pub struct Chunk {
    chunk_ref: ChunkRef,
    columns: ChunkColumns,
    occupancy: SlotBitmap,
    /// First slot of each entity's first segment.
    heads: SlotBitmap,
    /// Logical flags; non-zero only on head slots.
    flags: Vec<EntityFlags>,
    /// Length of the segment starting at each slot, 0 elsewhere.
    run_lengths: Vec<u32>,
    owners: Vec<EntityId>,
}

impl Chunk {
    /// Creates an empty chunk with every field at its default.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero.
    #[must_use]
    pub fn new(chunk_ref: ChunkRef, layout: Arc<ArchetypeLayout>, capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        Self {
            chunk_ref,
            columns: ChunkColumns::new(layout, capacity),
            occupancy: SlotBitmap::new(capacity),
            heads: SlotBitmap::new(capacity),
            flags: vec![EntityFlags::NONE; capacity],
            run_lengths: vec![0; capacity],
            owners: vec![EntityId::NULL; capacity],
        }
    }

    /// Address of this chunk.
    #[inline]
    #[must_use]
    pub const fn chunk_ref(&self) -> ChunkRef {
        self.chunk_ref
    }

    /// Slot count.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.columns.capacity
    }

    /// Fragment set of the owning archetype.
    #[inline]
    #[must_use]
    pub fn signature(&self) -> &ArchetypeSignature {
        self.columns.signature()
    }

    /// Field storage.
    #[inline]
    #[must_use]
    pub fn columns(&self) -> &ChunkColumns {
        &self.columns
    }

    /// Mutable field storage.
    #[inline]
    pub fn columns_mut(&mut self) -> &mut ChunkColumns {
        &mut self.columns
    }

    /// Field storage, flags and run lengths borrowed at once.
    #[inline]
    pub fn split_mut(&mut self) -> (&mut ChunkColumns, &mut [EntityFlags], &[u32]) {
        (&mut self.columns, &mut self.flags, &self.run_lengths)
    }

    /// See [`ChunkColumns::get_fragment_view`].
    #[must_use]
    pub fn get_fragment_view(&self, fragment: FragmentId) -> Option<FragmentView<'_>> {
        self.columns.get_fragment_view(fragment)
    }

    /// See [`ChunkColumns::get_fragment_view_mut`].
    pub fn get_fragment_view_mut(&mut self, fragment: FragmentId) -> Option<FragmentViewMut<'_>> {
        self.columns.get_fragment_view_mut(fragment)
    }

    /// Flags every fragment of the chunk as changed.
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.columns.mark_dirty();
    }

    /// Clears the dirty state.
    #[inline]
    pub fn clear_dirty(&mut self) {
        self.columns.clear_dirty();
    }

    /// See [`ChunkColumns::is_dirty`].
    #[inline]
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.columns.is_dirty()
    }

    /// See [`ChunkColumns::is_fragment_dirty`].
    #[inline]
    #[must_use]
    pub const fn is_fragment_dirty(&self, fragment: FragmentId) -> bool {
        self.columns.is_fragment_dirty(fragment)
    }

    /// Per-slot flags.
    #[inline]
    #[must_use]
    pub fn flags(&self) -> &[EntityFlags] {
        &self.flags
    }

    /// Mutable per-slot flags.
    #[inline]
    pub fn flags_mut(&mut self) -> &mut [EntityFlags] {
        &mut self.flags
    }

    /// Per-slot run lengths.
    #[inline]
    #[must_use]
    pub fn run_lengths(&self) -> &[u32] {
        &self.run_lengths
    }

    /// Entity owning `slot`, if occupied.
    #[inline]
    #[must_use]
    pub fn owner(&self, slot: usize) -> Option<EntityId> {
        self.occupancy
            .is_set(slot)
            .then(|| self.owners[slot])
    }

    /// Whether `slot` is the first slot of an entity, the one carrying its
    /// flags. Continuation segments in other chunks have no head.
    #[inline]
    #[must_use]
    pub fn is_head(&self, slot: usize) -> bool {
        self.heads.is_set(slot)
    }

    /// Occupancy bitmap.
    #[inline]
    #[must_use]
    pub fn occupancy(&self) -> &SlotBitmap {
        &self.occupancy
    }

    /// Occupied slot count (instances, not entities).
    #[inline]
    #[must_use]
    pub const fn live_slots(&self) -> usize {
        self.occupancy.count()
    }

    /// Free slot count.
    #[inline]
    #[must_use]
    pub const fn free_slots(&self) -> usize {
        self.capacity() - self.occupancy.count()
    }

    /// Lowest slot starting `len` consecutive free slots.
    #[must_use]
    pub fn find_free_run(&self, len: usize) -> Option<usize> {
        self.occupancy.find_clear_run(len)
    }

    /// Grows the chunk to `max(new_capacity, 2 * capacity)`, rounded up to
    /// a power of two. Existing slots are preserved, new slots hold
    /// defaults. Shrinking is a no-op.
    pub fn resize(&mut self, new_capacity: usize) {
        let capacity = self.capacity();
        if new_capacity <= capacity {
            return;
        }
        let target = new_capacity.max(capacity * 2).next_power_of_two();
        self.columns.resize(target);
        self.occupancy.resize(target);
        self.heads.resize(target);
        self.flags.resize(target, EntityFlags::NONE);
        self.run_lengths.resize(target, 0);
        self.owners.resize(target, EntityId::NULL);
        tracing::debug!(
            "Chunk {:?} resized {} -> {}",
            self.chunk_ref,
            capacity,
            target
        );
    }

    /// Writes `data` at `slot`. On a head slot the entity is also marked
    /// ALIVE | DIRTY; other instance slots only dirty the chunk.
    ///
    /// The whole record is validated before anything is written.
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidIndex`] if `slot` is out of range or free
    /// - [`StoreError::UnknownFragment`] if the chunk lacks the fragment
    /// - any error of [`FragmentSchema::resolve`]
    pub fn update_entity_data(&mut self, slot: usize, data: &FragmentData) -> StoreResult<()> {
        if slot < self.capacity() && !self.occupancy.is_set(slot) {
            return Err(AllocError::InvalidIndex {
                index: slot,
                len: self.capacity(),
            }
            .into());
        }
        self.write_instance(slot, data)?;
        if self.heads.is_set(slot) {
            self.flags[slot] |= EntityFlags::ALIVE | EntityFlags::DIRTY;
        }
        Ok(())
    }

    /// Writes `data` at `slot` without touching the slot's flags.
    pub(crate) fn write_instance(&mut self, slot: usize, data: &FragmentData) -> StoreResult<()> {
        self.check_slot(slot)?;
        let fields = self.columns.resolve(data)?;
        self.columns.write_resolved(slot, data, &fields);
        Ok(())
    }

    /// Writes defaults to `slot` and clears its flags. The slot stays
    /// occupied; cleared on a head, every instance of that entity becomes
    /// inactive and is left out of external buffers.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidIndex`] if `slot` is out of range.
    pub fn remove_entity(&mut self, slot: usize) -> StoreResult<()> {
        self.check_slot(slot)?;
        self.columns.reset_slots(slot, 1);
        self.columns.mark_dirty();
        self.flags[slot] = EntityFlags::NONE;
        Ok(())
    }

    fn check_slot(&self, slot: usize) -> StoreResult<()> {
        if slot < self.capacity() {
            Ok(())
        } else {
            Err(AllocError::InvalidIndex {
                index: slot,
                len: self.capacity(),
            }
            .into())
        }
    }

    /// Claims `slot..slot + len` for `owner` as one segment.
    pub(crate) fn occupy(&mut self, slot: usize, len: usize, owner: EntityId) {
        debug_assert!(self.occupancy.is_range_clear(slot, len), "Slots already occupied");
        self.occupancy.set_range(slot, len);
        self.owners[slot..slot + len].fill(owner);
        self.run_lengths[slot..slot + len].fill(0);
        self.run_lengths[slot] = len as u32;
    }

    /// As [`Self::occupy`], and makes `slot` the entity's head.
    pub(crate) fn occupy_head(&mut self, slot: usize, len: usize, owner: EntityId) {
        self.occupy(slot, len, owner);
        self.heads.set(slot);
    }

    /// Frees `slot..slot + len`: defaults written, flags and runs cleared.
    pub(crate) fn release(&mut self, slot: usize, len: usize) {
        self.columns.reset_slots(slot, len);
        self.occupancy.clear_range(slot, len);
        self.heads.clear_range(slot, len);
        self.flags[slot..slot + len].fill(EntityFlags::NONE);
        self.run_lengths[slot..slot + len].fill(0);
        self.owners[slot..slot + len].fill(EntityId::NULL);
    }

    pub(crate) fn set_run_length(&mut self, slot: usize, len: u32) {
        self.run_lengths[slot] = len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::column::ScalarKind;
    use crate::ecs::fragment::FieldDef;

    fn layout() -> (Arc<ArchetypeLayout>, FragmentId) {
        let schema = FragmentSchema::builder("light")
            .field(FieldDef::new("color", ScalarKind::F32, 3).with_default(1.0f32).mirrored())
            .field(FieldDef::new("slots", ScalarKind::U32, 4).variable())
            .build()
            .unwrap();
        let id = FragmentId::new(0);
        let layout = ArchetypeLayout::new(
            ArchetypeSignature::new(vec![id]),
            vec![Arc::new(schema)],
        );
        (Arc::new(layout), id)
    }

    fn chunk(capacity: usize) -> (Chunk, FragmentId) {
        let (layout, id) = layout();
        let chunk_ref = ChunkRef {
            archetype: ArchetypeId::new(1),
            index: 0,
        };
        (Chunk::new(chunk_ref, layout, capacity), id)
    }

    #[test]
    fn test_new_chunk_defaults() {
        let (chunk, light) = chunk(4);
        let view = chunk.get_fragment_view(light).unwrap();
        assert_eq!(view.f32s("color").unwrap(), &[1.0; 12]);
        assert_eq!(chunk.free_slots(), 4);
        assert!(!chunk.is_dirty());
    }

    #[test]
    fn test_update_entity_data_sets_flags_and_dirty() {
        let (mut chunk, light) = chunk(4);
        chunk.occupy_head(1, 1, EntityId::new(0, 1));
        let data = FragmentData::new(light)
            .with("color", [0.5f32, 0.25, 0.0])
            .with("slots", [9u32, 8]);
        chunk.update_entity_data(1, &data).unwrap();

        assert!(chunk.flags()[1].contains(EntityFlags::ALIVE | EntityFlags::DIRTY));
        assert!(chunk.is_dirty());
        assert!(chunk.is_fragment_dirty(light));

        let view = chunk.get_fragment_view(light).unwrap();
        assert_eq!(&view.f32s("color").unwrap()[3..6], &[0.5, 0.25, 0.0]);
        assert_eq!(&view.u32s("slots").unwrap()[4..8], &[9, 8, 0, 0]);
    }

    #[test]
    fn test_invalid_write_leaves_chunk_untouched() {
        let (mut chunk, light) = chunk(2);
        chunk.occupy_head(0, 1, EntityId::new(0, 1));
        let data = FragmentData::new(light)
            .with("color", [0.0f32, 0.0, 0.0])
            .with("slots", [0u32; 5]);
        assert!(matches!(
            chunk.update_entity_data(0, &data),
            Err(StoreError::StrideExceeded { .. })
        ));
        assert!(!chunk.is_dirty());
        assert_eq!(chunk.flags()[0], EntityFlags::NONE);
        assert_eq!(
            chunk.get_fragment_view(light).unwrap().f32s("color").unwrap()[0],
            1.0
        );

        let out_of_range = chunk.update_entity_data(2, &FragmentData::new(light));
        assert!(matches!(
            out_of_range,
            Err(StoreError::Alloc(AllocError::InvalidIndex { index: 2, len: 2 }))
        ));
    }

    #[test]
    fn test_remove_entity_restores_defaults() {
        let (mut chunk, light) = chunk(2);
        chunk.occupy_head(0, 1, EntityId::new(0, 1));
        chunk
            .update_entity_data(0, &FragmentData::new(light).with("color", [0.0f32; 3]))
            .unwrap();
        assert!(chunk.flags()[0].is_alive());
        chunk.remove_entity(0).unwrap();

        assert_eq!(chunk.flags()[0], EntityFlags::NONE);
        assert_eq!(chunk.live_slots(), 1);
        assert_eq!(
            &chunk.get_fragment_view(light).unwrap().f32s("color").unwrap()[0..3],
            &[1.0, 1.0, 1.0]
        );
    }

    #[test]
    fn test_instance_slot_write_keeps_flags_on_head() {
        let (mut chunk, light) = chunk(4);
        chunk.occupy_head(0, 3, EntityId::new(1, 1));
        let data = FragmentData::new(light).with("color", [0.5f32; 3]);
        chunk.update_entity_data(0, &data).unwrap();
        chunk.clear_dirty();

        chunk.update_entity_data(1, &data).unwrap();
        assert!(chunk.is_fragment_dirty(light));
        assert_eq!(chunk.flags()[1], EntityFlags::NONE);
        assert!(chunk.is_head(0));
        assert!(!chunk.is_head(1));
        assert_eq!(&chunk.get_fragment_view(light).unwrap().f32s("color").unwrap()[3..6], &[0.5; 3]);
    }

    #[test]
    fn test_write_to_free_slot_rejected() {
        let (mut chunk, light) = chunk(4);
        chunk.occupy_head(0, 1, EntityId::new(1, 1));
        let result = chunk.update_entity_data(2, &FragmentData::new(light).with("color", [0.5f32; 3]));
        assert!(matches!(
            result,
            Err(StoreError::Alloc(AllocError::InvalidIndex { index: 2, len: 4 }))
        ));
        assert_eq!(chunk.flags()[2], EntityFlags::NONE);
        assert!(!chunk.is_dirty());
    }

    #[test]
    fn test_resize_preserves_and_defaults() {
        let (mut chunk, light) = chunk(2);
        chunk.occupy_head(1, 1, EntityId::new(4, 1));
        chunk
            .update_entity_data(1, &FragmentData::new(light).with("color", [3.0f32; 3]))
            .unwrap();

        chunk.resize(3);
        assert_eq!(chunk.capacity(), 4);
        assert_eq!(chunk.owner(1), Some(EntityId::new(4, 1)));
        assert!(chunk.flags()[1].is_alive());

        let colors = chunk.get_fragment_view(light).unwrap().f32s("color").unwrap();
        assert_eq!(colors.len(), 12);
        assert_eq!(&colors[3..6], &[3.0; 3]);
        assert_eq!(&colors[6..12], &[1.0; 6]);

        chunk.resize(9);
        assert_eq!(chunk.capacity(), 16);
        chunk.resize(1);
        assert_eq!(chunk.capacity(), 16);
    }

    #[test]
    fn test_occupy_release_runs() {
        let (mut chunk, _) = chunk(8);
        let owner = EntityId::new(2, 1);
        chunk.occupy_head(2, 3, owner);
        assert!(chunk.is_head(2));
        assert_eq!(chunk.run_lengths()[2], 3);
        assert_eq!(chunk.run_lengths()[3], 0);
        assert_eq!(chunk.owner(4), Some(owner));
        assert_eq!(chunk.find_free_run(3), Some(5));

        chunk.release(2, 3);
        assert_eq!(chunk.live_slots(), 0);
        assert!(!chunk.is_head(2));
        assert_eq!(chunk.owner(2), None);
        assert_eq!(chunk.find_free_run(8), Some(0));
    }

    #[test]
    fn test_fragment_dirty_bits() {
        let (mut chunk, light) = chunk(2);
        chunk.mark_dirty();
        assert!(chunk.is_fragment_dirty(light));
        chunk.columns_mut().clear_fragment_dirty(light);
        assert!(!chunk.is_dirty());
    }
}
