//! # Built-in Fragments
//!
//! The fragment types every scene uses. Games add their own through
//! [`World::register_fragment`].
//!
//! ```text
//! Transform     position[3] rotation[4] scale[3]          (instance buffer)
//! Bounds        min[3] max[3]                             (CPU only)
//! MeshInstance  mesh_id material_slots[<=8]               (instance buffer)
//! Light         color[3] intensity range kind             (storage buffer)
//! TextGlyph     glyph advance atlas_rect[4]               (instance buffer)
//! ```

use super::column::ScalarKind;
use super::fragment::{FieldDef, FragmentId, FragmentSchema, UsageMask};
use super::world::World;
use crate::error::StoreResult;

/// Material slots per mesh instance.
pub const MAX_MATERIAL_SLOTS: usize = 8;

/// Built-in fragment types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinFragment {
    /// Position, rotation quaternion and scale.
    Transform,
    /// Axis-aligned bounding box.
    Bounds,
    /// Mesh and material binding.
    MeshInstance,
    /// Point / spot / directional light.
    Light,
    /// One glyph of laid-out text.
    TextGlyph,
}

impl BuiltinFragment {
    /// Every built-in, in registration order.
    pub const ALL: [Self; 5] = [
        Self::Transform,
        Self::Bounds,
        Self::MeshInstance,
        Self::Light,
        Self::TextGlyph,
    ];

    /// Registry name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Transform => "transform",
            Self::Bounds => "bounds",
            Self::MeshInstance => "mesh_instance",
            Self::Light => "light",
            Self::TextGlyph => "text_glyph",
        }
    }

    /// Builds the schema.
    ///
    /// # Errors
    ///
    /// Never for the shipped definitions; see [`FragmentSchema::builder`].
    pub fn schema(self) -> StoreResult<FragmentSchema> {
        let instance = UsageMask::VERTEX | UsageMask::INSTANCE | UsageMask::COPY_DST;
        let builder = FragmentSchema::builder(self.name());
        match self {
            Self::Transform => builder
                .field(FieldDef::new("position", ScalarKind::F32, 3).mirrored())
                .field(FieldDef::new("rotation", ScalarKind::F32, 4).mirrored())
                .field(
                    FieldDef::new("scale", ScalarKind::F32, 3)
                        .with_default(1.0f32)
                        .mirrored(),
                )
                .usage(instance),
            Self::Bounds => builder
                .field(FieldDef::new("min", ScalarKind::F32, 3))
                .field(FieldDef::new("max", ScalarKind::F32, 3)),
            Self::MeshInstance => builder
                .field(FieldDef::new("mesh_id", ScalarKind::U32, 1).mirrored())
                .field(
                    FieldDef::new("material_slots", ScalarKind::U32, MAX_MATERIAL_SLOTS)
                        .with_default(u32::MAX)
                        .variable()
                        .mirrored(),
                )
                .usage(instance),
            Self::Light => builder
                .field(
                    FieldDef::new("color", ScalarKind::F32, 3)
                        .with_default(1.0f32)
                        .mirrored(),
                )
                .field(
                    FieldDef::new("intensity", ScalarKind::F32, 1)
                        .with_default(1.0f32)
                        .mirrored(),
                )
                .field(
                    FieldDef::new("range", ScalarKind::F32, 1)
                        .with_default(10.0f32)
                        .mirrored(),
                )
                .field(FieldDef::new("kind", ScalarKind::U8, 1))
                .usage(UsageMask::STORAGE | UsageMask::COPY_DST),
            Self::TextGlyph => builder
                .field(FieldDef::new("glyph", ScalarKind::U32, 1).mirrored())
                .field(FieldDef::new("advance", ScalarKind::F32, 1))
                .field(FieldDef::new("atlas_rect", ScalarKind::F32, 4).mirrored())
                .usage(instance),
        }
        .build()
    }
}

/// Ids of the registered built-ins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuiltinIds {
    /// [`BuiltinFragment::Transform`].
    pub transform: FragmentId,
    /// [`BuiltinFragment::Bounds`].
    pub bounds: FragmentId,
    /// [`BuiltinFragment::MeshInstance`].
    pub mesh_instance: FragmentId,
    /// [`BuiltinFragment::Light`].
    pub light: FragmentId,
    /// [`BuiltinFragment::TextGlyph`].
    pub text_glyph: FragmentId,
}

impl BuiltinIds {
    /// Id of one built-in.
    #[must_use]
    pub const fn get(&self, fragment: BuiltinFragment) -> FragmentId {
        match fragment {
            BuiltinFragment::Transform => self.transform,
            BuiltinFragment::Bounds => self.bounds,
            BuiltinFragment::MeshInstance => self.mesh_instance,
            BuiltinFragment::Light => self.light,
            BuiltinFragment::TextGlyph => self.text_glyph,
        }
    }
}

impl World {
    /// Registers every built-in fragment. Idempotent.
    ///
    /// # Errors
    ///
    /// [`crate::StoreError::SchemaConflict`] if a different schema already
    /// uses a built-in name, or [`crate::StoreError::TooManyFragments`].
    pub fn register_builtins(&mut self) -> StoreResult<BuiltinIds> {
        let mut register = |fragment: BuiltinFragment| -> StoreResult<FragmentId> {
            self.register_fragment(fragment.schema()?)
        };
        Ok(BuiltinIds {
            transform: register(BuiltinFragment::Transform)?,
            bounds: register(BuiltinFragment::Bounds)?,
            mesh_instance: register(BuiltinFragment::MeshInstance)?,
            light: register(BuiltinFragment::Light)?,
            text_glyph: register(BuiltinFragment::TextGlyph)?,
        })
    }
}
