//! # Fragment Schemas
//!
//! A fragment is a named bundle of fields attached to entities. Its schema
//! is static: once registered it never changes.
//!
//! ```rust,ignore
//! let schema = FragmentSchema::builder("light")
//!     .field(FieldDef::new("color", ScalarKind::F32, 3).with_default(1.0f32).mirrored())
//!     .field(FieldDef::new("range", ScalarKind::F32, 1).with_default(10.0f32))
//!     .usage(UsageMask::INSTANCE)
//!     .build()?;
//! let light = world.register_fragment(schema)?;
//! ```

use std::collections::HashMap;
use std::ops::BitOr;
use std::sync::Arc;

use super::column::{Column, Scalar, ScalarKind};
use crate::error::{StoreError, StoreResult};

/// Maximum number of fragment types per world (one dirty bit each).
pub const MAX_FRAGMENTS: usize = 64;

/// Default size of the per-fragment accessor ring.
pub const DEFAULT_VIEW_CAPACITY: usize = 64;

/// Registered fragment type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId(u16);

impl FragmentId {
    /// Builds an id from a registry index.
    #[inline]
    #[must_use]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Registry index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Bit of this fragment in a 64-bit fragment mask.
    #[inline]
    #[must_use]
    pub const fn bit(self) -> u64 {
        1u64 << self.0
    }
}

/// How an external buffer built from a fragment will be bound.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct UsageMask(u32);

impl UsageMask {
    /// Not bound.
    pub const NONE: Self = Self(0);
    /// Per-vertex attributes.
    pub const VERTEX: Self = Self(1 << 0);
    /// Per-instance attributes.
    pub const INSTANCE: Self = Self(1 << 1);
    /// Storage buffer.
    pub const STORAGE: Self = Self(1 << 2);
    /// Uniform buffer.
    pub const UNIFORM: Self = Self(1 << 3);
    /// Buffer accepts partial writes.
    pub const COPY_DST: Self = Self(1 << 4);

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Checks that every bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for UsageMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One field of a fragment.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDef {
    name: String,
    kind: ScalarKind,
    count: usize,
    default: Scalar,
    variable: bool,
    mirrored: bool,
}

impl FieldDef {
    /// Field of `count` scalars of `kind`, zero-defaulted.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ScalarKind, count: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            count,
            default: Scalar::zero(kind),
            variable: false,
            mirrored: false,
        }
    }

    /// Sets the fill value for fresh and released slots.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Scalar>) -> Self {
        self.default = value.into();
        self
    }

    /// Accepts up to `count` elements per write instead of exactly `count`.
    #[must_use]
    pub fn variable(mut self) -> Self {
        self.variable = true;
        self
    }

    /// Includes the field in the fragment's external buffer.
    #[must_use]
    pub fn mirrored(mut self) -> Self {
        self.mirrored = true;
        self
    }

    /// Field name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scalar kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ScalarKind {
        self.kind
    }

    /// Elements per slot (the maximum, for variable-length fields).
    #[inline]
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Fill value.
    #[inline]
    #[must_use]
    pub const fn default_value(&self) -> Scalar {
        self.default
    }

    /// Variable-length flag.
    #[inline]
    #[must_use]
    pub const fn is_variable(&self) -> bool {
        self.variable
    }

    /// External mirroring flag.
    #[inline]
    #[must_use]
    pub const fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    /// Bytes per slot.
    #[inline]
    #[must_use]
    pub const fn byte_stride(&self) -> usize {
        self.count * self.kind.size_bytes()
    }
}

/// Static description of a fragment type.
#[derive(Clone, Debug, PartialEq)]
pub struct FragmentSchema {
    name: String,
    fields: Vec<FieldDef>,
    usage: UsageMask,
    view_capacity: usize,
}

impl FragmentSchema {
    /// Starts a schema.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> FragmentSchemaBuilder {
        FragmentSchemaBuilder {
            schema: Self {
                name: name.into(),
                fields: Vec::new(),
                usage: UsageMask::NONE,
                view_capacity: DEFAULT_VIEW_CAPACITY,
            },
        }
    }

    /// Name, field table and accessor ring are all non-empty.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.fields.is_empty() && self.view_capacity > 0
    }

    fn check(&self) -> StoreResult<()> {
        if !self.is_valid() {
            return Err(StoreError::InvalidSchema(format!(
                "`{}` needs a name, at least one field and a view capacity",
                self.name
            )));
        }
        for (index, field) in self.fields.iter().enumerate() {
            if field.name.is_empty() || field.count == 0 {
                return Err(StoreError::InvalidSchema(format!(
                    "`{}` field #{index} needs a name and a non-zero count",
                    self.name
                )));
            }
            if field.default.kind() != field.kind {
                return Err(StoreError::InvalidSchema(format!(
                    "`{}.{}` default is {:?}, field is {:?}",
                    self.name,
                    field.name,
                    field.default.kind(),
                    field.kind
                )));
            }
            if self.fields[..index].iter().any(|f| f.name == field.name) {
                return Err(StoreError::InvalidSchema(format!(
                    "`{}` declares `{}` twice",
                    self.name, field.name
                )));
            }
        }
        Ok(())
    }

    /// Fragment name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order.
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Position of a field by name.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// External buffer usage.
    #[inline]
    #[must_use]
    pub const fn usage(&self) -> UsageMask {
        self.usage
    }

    /// Capacity of the accessor ring.
    #[inline]
    #[must_use]
    pub const fn view_capacity(&self) -> usize {
        self.view_capacity
    }

    /// Returns `true` if any field is mirrored externally.
    #[must_use]
    pub fn is_mirrored(&self) -> bool {
        self.fields.iter().any(FieldDef::is_mirrored)
    }

    /// Packed bytes per slot in the external buffer.
    #[must_use]
    pub fn mirrored_stride(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| f.mirrored)
            .map(FieldDef::byte_stride)
            .sum()
    }

    /// Checks a record against the schema and resolves its field positions.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownField`] for undeclared names
    /// - [`StoreError::KindMismatch`] for wrongly typed values
    /// - [`StoreError::ShapeMismatch`] when a fixed field gets the wrong count
    /// - [`StoreError::StrideExceeded`] when a variable field gets too many
    pub fn resolve(&self, data: &FragmentData) -> StoreResult<Vec<usize>> {
        data.values
            .iter()
            .map(|(name, column)| {
                let index = self.field_index(name).ok_or_else(|| StoreError::UnknownField {
                    fragment: self.name.clone(),
                    field: name.clone(),
                })?;
                let field = &self.fields[index];
                if column.kind() != field.kind {
                    return Err(StoreError::KindMismatch {
                        fragment: self.name.clone(),
                        field: name.clone(),
                        expected: field.kind,
                        actual: column.kind(),
                    });
                }
                let len = column.len();
                if field.variable && len > field.count {
                    return Err(StoreError::StrideExceeded {
                        fragment: self.name.clone(),
                        field: name.clone(),
                        len,
                        max: field.count,
                    });
                }
                if !field.variable && len != field.count {
                    return Err(StoreError::ShapeMismatch {
                        fragment: self.name.clone(),
                        field: name.clone(),
                        expected: field.count,
                        actual: len,
                    });
                }
                Ok(index)
            })
            .collect()
    }
}

/// Builder returned by [`FragmentSchema::builder`].
#[derive(Debug)]
pub struct FragmentSchemaBuilder {
    schema: FragmentSchema,
}

impl FragmentSchemaBuilder {
    /// Appends a field.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.schema.fields.push(field);
        self
    }

    /// Sets the external buffer usage.
    #[must_use]
    pub fn usage(mut self, usage: UsageMask) -> Self {
        self.schema.usage = usage;
        self
    }

    /// Sets the accessor ring capacity.
    #[must_use]
    pub fn view_capacity(mut self, capacity: usize) -> Self {
        self.schema.view_capacity = capacity;
        self
    }

    /// Finishes the schema.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidSchema`] if the schema is empty, has a zero-count
    /// or duplicate field, or a default of the wrong kind.
    pub fn build(self) -> StoreResult<FragmentSchema> {
        self.schema.check()?;
        Ok(self.schema)
    }
}

/// Values for some or all fields of one fragment.
#[derive(Clone, Debug, PartialEq)]
pub struct FragmentData {
    fragment: FragmentId,
    values: Vec<(String, Column)>,
}

impl FragmentData {
    /// Empty record: every field keeps its default.
    #[must_use]
    pub fn new(fragment: FragmentId) -> Self {
        Self {
            fragment,
            values: Vec::new(),
        }
    }

    /// Adds (or replaces) a field value.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Column>) -> Self {
        self.set(field, value);
        self
    }

    /// Adds (or replaces) a field value in place.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Column>) {
        let field = field.into();
        let value = value.into();
        match self.values.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => self.values.push((field, value)),
        }
    }

    /// Target fragment.
    #[inline]
    #[must_use]
    pub const fn fragment(&self) -> FragmentId {
        self.fragment
    }

    /// Field values in insertion order.
    #[inline]
    #[must_use]
    pub fn values(&self) -> &[(String, Column)] {
        &self.values
    }

    /// Value of one field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Column> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, column)| column)
    }
}

/// Name-keyed table of registered fragment schemas.
#[derive(Debug, Default)]
pub struct FragmentRegistry {
    schemas: Vec<Arc<FragmentSchema>>,
    by_name: HashMap<String, FragmentId>,
}

impl FragmentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema, or returns the id of an identical one.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidSchema`] if the schema fails validation
    /// - [`StoreError::SchemaConflict`] if the name is taken by a different schema
    /// - [`StoreError::TooManyFragments`] past [`MAX_FRAGMENTS`]
    pub fn register(&mut self, schema: FragmentSchema) -> StoreResult<FragmentId> {
        schema.check()?;

        if let Some(&id) = self.by_name.get(schema.name()) {
            return if *self.schemas[id.index()] == schema {
                Ok(id)
            } else {
                Err(StoreError::SchemaConflict(schema.name))
            };
        }

        if self.schemas.len() >= MAX_FRAGMENTS {
            return Err(StoreError::TooManyFragments {
                limit: MAX_FRAGMENTS,
            });
        }

        let id = FragmentId::new(self.schemas.len() as u16);
        self.by_name.insert(schema.name.clone(), id);
        self.schemas.push(Arc::new(schema));
        Ok(id)
    }

    /// Schema of a registered fragment.
    #[inline]
    #[must_use]
    pub fn get(&self, id: FragmentId) -> Option<&Arc<FragmentSchema>> {
        self.schemas.get(id.index())
    }

    /// Id registered under `name`.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<FragmentId> {
        self.by_name.get(name).copied()
    }

    /// Checks that `id` is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: FragmentId) -> bool {
        id.index() < self.schemas.len()
    }

    /// Number of registered fragments.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Returns `true` when nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Registered schemas in id order.
    pub fn iter(&self) -> impl Iterator<Item = (FragmentId, &Arc<FragmentSchema>)> {
        self.schemas
            .iter()
            .enumerate()
            .map(|(index, schema)| (FragmentId::new(index as u16), schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh_schema() -> FragmentSchema {
        FragmentSchema::builder("mesh")
            .field(FieldDef::new("mesh_id", ScalarKind::U32, 1).mirrored())
            .field(FieldDef::new("material_slots", ScalarKind::U32, 8).variable())
            .usage(UsageMask::INSTANCE | UsageMask::COPY_DST)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_validation() {
        assert!(mesh_schema().is_valid());
        assert!(FragmentSchema::builder("empty").build().is_err());
        assert!(FragmentSchema::builder("")
            .field(FieldDef::new("x", ScalarKind::F32, 1))
            .build()
            .is_err());
        assert!(FragmentSchema::builder("no_views")
            .field(FieldDef::new("x", ScalarKind::F32, 1))
            .view_capacity(0)
            .build()
            .is_err());
        assert!(FragmentSchema::builder("bad_default")
            .field(FieldDef::new("x", ScalarKind::F32, 1).with_default(1u32))
            .build()
            .is_err());
        assert!(FragmentSchema::builder("dup")
            .field(FieldDef::new("x", ScalarKind::F32, 1))
            .field(FieldDef::new("x", ScalarKind::F32, 2))
            .build()
            .is_err());
    }

    #[test]
    fn test_mirrored_stride() {
        let schema = mesh_schema();
        assert!(schema.is_mirrored());
        assert_eq!(schema.mirrored_stride(), 4);
        assert!(schema.usage().contains(UsageMask::INSTANCE));
    }

    #[test]
    fn test_resolve_shapes() {
        let schema = mesh_schema();
        let id = FragmentId::new(0);

        let ok = FragmentData::new(id)
            .with("material_slots", vec![1u32, 2, 3])
            .with("mesh_id", 7u32);
        assert_eq!(schema.resolve(&ok).unwrap(), vec![1, 0]);

        let too_long = FragmentData::new(id).with("material_slots", [0u32; 9]);
        assert!(matches!(
            schema.resolve(&too_long),
            Err(StoreError::StrideExceeded { len: 9, max: 8, .. })
        ));

        let wrong_shape = FragmentData::new(id).with("mesh_id", [1u32, 2]);
        assert!(matches!(
            schema.resolve(&wrong_shape),
            Err(StoreError::ShapeMismatch { expected: 1, actual: 2, .. })
        ));

        let unknown = FragmentData::new(id).with("lod", 1u32);
        assert!(matches!(
            schema.resolve(&unknown),
            Err(StoreError::UnknownField { .. })
        ));

        let wrong_kind = FragmentData::new(id).with("mesh_id", 1.0f32);
        assert!(matches!(
            schema.resolve(&wrong_kind),
            Err(StoreError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_registry_idempotent_and_conflict() {
        let mut registry = FragmentRegistry::new();
        let a = registry.register(mesh_schema()).unwrap();
        let b = registry.register(mesh_schema()).unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.id_of("mesh"), Some(a));

        let changed = FragmentSchema::builder("mesh")
            .field(FieldDef::new("mesh_id", ScalarKind::U32, 2))
            .build()
            .unwrap();
        assert_eq!(
            registry.register(changed),
            Err(StoreError::SchemaConflict("mesh".into()))
        );
    }

    #[test]
    fn test_registry_limit() {
        let mut registry = FragmentRegistry::new();
        for i in 0..MAX_FRAGMENTS {
            let schema = FragmentSchema::builder(format!("f{i}"))
                .field(FieldDef::new("v", ScalarKind::U8, 1))
                .build()
                .unwrap();
            registry.register(schema).unwrap();
        }
        let overflow = FragmentSchema::builder("overflow")
            .field(FieldDef::new("v", ScalarKind::U8, 1))
            .build()
            .unwrap();
        let err = registry.register(overflow).unwrap_err();
        assert!(err.is_capacity_error());
    }

    #[test]
    fn test_fragment_data_replace() {
        let mut data = FragmentData::new(FragmentId::new(3)).with("a", 1u32);
        data.set("a", 2u32);
        assert_eq!(data.values().len(), 1);
        assert_eq!(data.get("a"), Some(&Column::from(2u32)));
        assert_eq!(data.fragment().index(), 3);
    }
}
