//! # Field Accessors
//!
//! A field accessor pins one field of one entity instance to its chunk
//! column so repeated reads and writes skip the directory lookup.
//!
//! Accessors are frame-scoped: each fragment owns a ring of them, emptied
//! at every frame end. An accessor is rejected with
//! [`StoreError::StaleAccessor`] once
//!
//! - any structural change happened after it was issued, or
//! - the frame ended, or
//! - its ring slot was handed to a newer accessor.

use super::chunk::ChunkRef;
use super::column::Column;
use super::entity::{EntityFlags, EntityId};
use super::fragment::FragmentId;
use super::world::World;
use crate::error::{StoreError, StoreResult};
use crate::memory::RingHandle;

/// Resolved address of one field of one instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldAccessor {
    /// Owning entity.
    pub entity: EntityId,
    /// Chunk holding the instance.
    pub chunk: ChunkRef,
    /// Fragment of the field.
    pub fragment: FragmentId,
    /// Field position within the fragment schema.
    pub field: usize,
    /// First element of the instance in the field column.
    pub base_offset: usize,
    /// Elements per instance.
    pub stride: usize,
    epoch: u64,
    serial: u64,
}

/// Handle to an accessor in the world's accessor rings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccessorHandle {
    fragment: FragmentId,
    slot: RingHandle,
    serial: u64,
}

impl World {
    /// Issues an accessor for `field` of instance `instance`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownEntity`] / [`StoreError::FragmentNotAttached`]
    /// - [`StoreError::InstanceOutOfRange`]
    /// - [`StoreError::UnknownField`]
    pub fn accessor(
        &mut self,
        entity: EntityId,
        instance: u32,
        fragment: FragmentId,
        field: &str,
    ) -> StoreResult<AccessorHandle> {
        let location = self.attached(entity, fragment)?;
        let (chunk, slot) = location
            .instance(instance)
            .ok_or(StoreError::InstanceOutOfRange {
                entity,
                index: instance,
                count: location.instance_count(),
            })?;
        let schema = self
            .registry
            .get(fragment)
            .ok_or(StoreError::UnknownFragment(fragment))?;
        let field_index = schema.field_index(field).ok_or_else(|| StoreError::UnknownField {
            fragment: schema.name().to_owned(),
            field: field.to_owned(),
        })?;
        let stride = schema.fields()[field_index].count();

        self.view_serial += 1;
        let accessor = FieldAccessor {
            entity,
            chunk,
            fragment,
            field: field_index,
            base_offset: slot * stride,
            stride,
            epoch: self.epoch,
            serial: self.view_serial,
        };
        let ring = self
            .views
            .get_mut(fragment.index())
            .ok_or(StoreError::UnknownFragment(fragment))?;
        let slot = ring.push(Some(accessor))?;
        Ok(AccessorHandle {
            fragment,
            slot,
            serial: self.view_serial,
        })
    }

    /// The accessor behind a handle, if still valid.
    ///
    /// # Errors
    ///
    /// [`StoreError::StaleAccessor`].
    pub fn field_accessor(&self, handle: AccessorHandle) -> StoreResult<FieldAccessor> {
        self.views
            .get(handle.fragment.index())
            .and_then(|ring| ring.get(handle.slot))
            .copied()
            .flatten()
            .filter(|a| a.serial == handle.serial && a.epoch == self.epoch)
            .ok_or(StoreError::StaleAccessor)
    }

    /// Reads the addressed field.
    ///
    /// # Errors
    ///
    /// [`StoreError::StaleAccessor`].
    pub fn read_field(&self, handle: AccessorHandle) -> StoreResult<Column> {
        let accessor = self.field_accessor(handle)?;
        self.chunk(accessor.chunk)
            .and_then(|c| c.columns().column(accessor.fragment, accessor.field))
            .map(|column| column.slice(accessor.base_offset..accessor.base_offset + accessor.stride))
            .ok_or(StoreError::StaleAccessor)
    }

    /// Overwrites the addressed field and marks the fragment dirty.
    ///
    /// Variable-length fields accept up to their stride; the rest of the
    /// slot goes back to the field default.
    ///
    /// # Errors
    ///
    /// - [`StoreError::StaleAccessor`]
    /// - [`StoreError::KindMismatch`], [`StoreError::ShapeMismatch`] or
    ///   [`StoreError::StrideExceeded`] (nothing is written)
    pub fn write_field(&mut self, handle: AccessorHandle, value: impl Into<Column>) -> StoreResult<()> {
        let value = value.into();
        let accessor = self.field_accessor(handle)?;
        let schema = self
            .registry
            .get(accessor.fragment)
            .ok_or(StoreError::UnknownFragment(accessor.fragment))?;
        let def = &schema.fields()[accessor.field];
        let name = || (schema.name().to_owned(), def.name().to_owned());

        if value.kind() != def.kind() {
            let (fragment, field) = name();
            return Err(StoreError::KindMismatch {
                fragment,
                field,
                expected: def.kind(),
                actual: value.kind(),
            });
        }
        if def.is_variable() && value.len() > def.count() {
            let (fragment, field) = name();
            return Err(StoreError::StrideExceeded {
                fragment,
                field,
                len: value.len(),
                max: def.count(),
            });
        }
        if !def.is_variable() && value.len() != def.count() {
            let (fragment, field) = name();
            return Err(StoreError::ShapeMismatch {
                fragment,
                field,
                expected: def.count(),
                actual: value.len(),
            });
        }
        let default = def.default_value();

        let chunk = self.expect_chunk_mut(accessor.chunk)?;
        let columns = chunk.columns_mut();
        let column = columns
            .column_mut(accessor.fragment, accessor.field)
            .ok_or(StoreError::StaleAccessor)?;
        let start = accessor.base_offset;
        column.copy_from(start, &value, 0..value.len());
        column.fill(start + value.len()..start + accessor.stride, default);
        columns.mark_fragment_dirty(accessor.fragment);

        self.head_flags_mut(accessor.entity)?.insert(EntityFlags::DIRTY);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::ecs::column::ScalarKind;
    use crate::ecs::fragment::{FieldDef, FragmentData, FragmentSchema};

    fn world() -> (World, FragmentId) {
        let mut world = World::new(StoreConfig::with_chunk_capacity(4)).unwrap();
        let mesh = world
            .register_fragment(
                FragmentSchema::builder("mesh")
                    .field(FieldDef::new("mesh_id", ScalarKind::U32, 1))
                    .field(FieldDef::new("slots", ScalarKind::U32, 4).variable())
                    .view_capacity(2)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        (world, mesh)
    }

    #[test]
    fn test_read_write_through() {
        let (mut world, mesh) = world();
        let e = world
            .spawn(&[FragmentData::new(mesh).with("slots", vec![1u32, 2, 3, 4])])
            .unwrap();
        let handle = world.accessor(e, 0, mesh, "slots").unwrap();
        assert_eq!(world.read_field(handle).unwrap(), Column::from(vec![1u32, 2, 3, 4]));

        world.write_field(handle, vec![9u32]).unwrap();
        assert_eq!(
            world.get_field(e, 0, mesh, "slots").unwrap(),
            Column::from(vec![9u32, 0, 0, 0])
        );
        let (chunk, _) = world.location(e).unwrap().head();
        assert!(world.chunk(chunk).unwrap().is_fragment_dirty(mesh));
    }

    #[test]
    fn test_write_validation() {
        let (mut world, mesh) = world();
        let e = world.spawn(&[FragmentData::new(mesh)]).unwrap();
        let slots = world.accessor(e, 0, mesh, "slots").unwrap();
        let id = world.accessor(e, 0, mesh, "mesh_id").unwrap();
        assert!(matches!(
            world.write_field(slots, vec![0u32; 5]),
            Err(StoreError::StrideExceeded { len: 5, max: 4, .. })
        ));
        assert!(matches!(
            world.write_field(id, vec![1u32, 2]),
            Err(StoreError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            world.write_field(id, 1.0f32),
            Err(StoreError::KindMismatch { .. })
        ));
        assert!(matches!(
            world.accessor(e, 0, mesh, "nope"),
            Err(StoreError::UnknownField { .. })
        ));
        assert!(matches!(
            world.accessor(e, 1, mesh, "slots"),
            Err(StoreError::InstanceOutOfRange { .. })
        ));
    }

    #[test]
    fn test_staleness() {
        let (mut world, mesh) = world();
        let e = world.spawn(&[FragmentData::new(mesh)]).unwrap();

        // Structural change.
        let handle = world.accessor(e, 0, mesh, "mesh_id").unwrap();
        world.create_entity().unwrap();
        assert_eq!(world.read_field(handle), Err(StoreError::StaleAccessor));

        // Frame end.
        let handle = world.accessor(e, 0, mesh, "mesh_id").unwrap();
        world.end_frame();
        assert_eq!(world.read_field(handle), Err(StoreError::StaleAccessor));

        // Ring slot reused (capacity 2).
        let first = world.accessor(e, 0, mesh, "mesh_id").unwrap();
        let second = world.accessor(e, 0, mesh, "slots").unwrap();
        world.accessor(e, 0, mesh, "slots").unwrap();
        assert_eq!(world.read_field(first), Err(StoreError::StaleAccessor));
        assert!(world.read_field(second).is_ok());
    }
}
