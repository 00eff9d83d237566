//! # Typed Columns
//!
//! A [`Column`] is one field of one fragment across every slot of a chunk:
//! `capacity * element_count` scalars laid out slot after slot.
//!
//! ```text
//! position (f32 x 3), capacity 4:
//! [x0 y0 z0 | x1 y1 z1 | x2 y2 z2 | x3 y3 z3]
//! ```
//!
//! Columns are plain `Vec`s of `Pod` scalars, so packing for external
//! buffers is a `bytemuck::cast_slice` away.

use std::ops::Range;

/// Scalar type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// 32-bit float.
    F32,
    /// 32-bit signed integer.
    I32,
    /// 32-bit unsigned integer.
    U32,
    /// Byte.
    U8,
}

impl ScalarKind {
    /// Size of one scalar in bytes.
    #[inline]
    #[must_use]
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::U8 => 1,
        }
    }
}

/// A single scalar value, used for field defaults.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    /// 32-bit float.
    F32(f32),
    /// 32-bit signed integer.
    I32(i32),
    /// 32-bit unsigned integer.
    U32(u32),
    /// Byte.
    U8(u8),
}

impl Scalar {
    /// Zero of the given kind.
    #[must_use]
    pub const fn zero(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::F32 => Self::F32(0.0),
            ScalarKind::I32 => Self::I32(0),
            ScalarKind::U32 => Self::U32(0),
            ScalarKind::U8 => Self::U8(0),
        }
    }

    /// Kind of this scalar.
    #[inline]
    #[must_use]
    pub const fn kind(self) -> ScalarKind {
        match self {
            Self::F32(_) => ScalarKind::F32,
            Self::I32(_) => ScalarKind::I32,
            Self::U32(_) => ScalarKind::U32,
            Self::U8(_) => ScalarKind::U8,
        }
    }
}

/// Conversion from [`Scalar`] into a concrete column element.
trait Element: Copy {
    fn from_scalar(value: Scalar) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                #[inline]
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap, clippy::cast_precision_loss)]
                fn from_scalar(value: Scalar) -> Self {
                    match value {
                        Scalar::F32(v) => v as $ty,
                        Scalar::I32(v) => v as $ty,
                        Scalar::U32(v) => v as $ty,
                        Scalar::U8(v) => v as $ty,
                    }
                }
            }

            impl From<$ty> for Scalar {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }

            impl From<Vec<$ty>> for Column {
                fn from(values: Vec<$ty>) -> Self {
                    Self::$variant(values)
                }
            }

            impl From<&[$ty]> for Column {
                fn from(values: &[$ty]) -> Self {
                    Self::$variant(values.to_vec())
                }
            }

            impl<const N: usize> From<[$ty; N]> for Column {
                fn from(values: [$ty; N]) -> Self {
                    Self::$variant(values.to_vec())
                }
            }

            impl From<$ty> for Column {
                fn from(value: $ty) -> Self {
                    Self::$variant(vec![value])
                }
            }
        )*
    };
}

impl_element!(f32 => F32, i32 => I32, u32 => U32, u8 => U8);

/// Runs `$body` with `$v` bound to the inner `Vec` of whichever variant.
macro_rules! with_column {
    ($column:expr, $v:ident => $body:expr) => {
        match $column {
            Column::F32($v) => $body,
            Column::I32($v) => $body,
            Column::U32($v) => $body,
            Column::U8($v) => $body,
        }
    };
}

/// Homogeneous scalar storage for one field.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    /// `f32` elements.
    F32(Vec<f32>),
    /// `i32` elements.
    I32(Vec<i32>),
    /// `u32` elements.
    U32(Vec<u32>),
    /// `u8` elements.
    U8(Vec<u8>),
}

impl Column {
    /// Column of `len` copies of `value`.
    #[must_use]
    pub fn filled(value: Scalar, len: usize) -> Self {
        match value {
            Scalar::F32(v) => Self::F32(vec![v; len]),
            Scalar::I32(v) => Self::I32(vec![v; len]),
            Scalar::U32(v) => Self::U32(vec![v; len]),
            Scalar::U8(v) => Self::U8(vec![v; len]),
        }
    }

    /// Empty column of the given kind.
    #[must_use]
    pub fn empty(kind: ScalarKind) -> Self {
        Self::filled(Scalar::zero(kind), 0)
    }

    /// Scalar kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ScalarKind {
        match self {
            Self::F32(_) => ScalarKind::F32,
            Self::I32(_) => ScalarKind::I32,
            Self::U32(_) => ScalarKind::U32,
            Self::U8(_) => ScalarKind::U8,
        }
    }

    /// Number of scalars.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        with_column!(self, v => v.len())
    }

    /// Returns `true` if the column holds no scalars.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scalar at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Scalar> {
        with_column!(self, v => v.get(index).copied().map(Scalar::from))
    }

    /// Grows or truncates to `len`, filling new scalars with `value`.
    pub fn resize(&mut self, len: usize, value: Scalar) {
        with_column!(self, v => v.resize(len, Element::from_scalar(value)));
    }

    /// Overwrites `range` with `value`.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds.
    pub fn fill(&mut self, range: Range<usize>, value: Scalar) {
        with_column!(self, v => v[range].fill(Element::from_scalar(value)));
    }

    /// Copies `src[src_range]` into `self` starting at `dst`.
    ///
    /// Returns `false` (and copies nothing) when the kinds differ.
    ///
    /// # Panics
    ///
    /// Panics if either range is out of bounds.
    pub fn copy_from(&mut self, dst: usize, src: &Self, src_range: Range<usize>) -> bool {
        let len = src_range.len();
        match (self, src) {
            (Self::F32(d), Self::F32(s)) => d[dst..dst + len].copy_from_slice(&s[src_range]),
            (Self::I32(d), Self::I32(s)) => d[dst..dst + len].copy_from_slice(&s[src_range]),
            (Self::U32(d), Self::U32(s)) => d[dst..dst + len].copy_from_slice(&s[src_range]),
            (Self::U8(d), Self::U8(s)) => d[dst..dst + len].copy_from_slice(&s[src_range]),
            _ => return false,
        }
        true
    }

    /// Appends `src[range]`. Returns `false` when the kinds differ.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds.
    pub fn extend_from(&mut self, src: &Self, range: Range<usize>) -> bool {
        match (self, src) {
            (Self::F32(d), Self::F32(s)) => d.extend_from_slice(&s[range]),
            (Self::I32(d), Self::I32(s)) => d.extend_from_slice(&s[range]),
            (Self::U32(d), Self::U32(s)) => d.extend_from_slice(&s[range]),
            (Self::U8(d), Self::U8(s)) => d.extend_from_slice(&s[range]),
            _ => return false,
        }
        true
    }

    /// Copy of `range` as a new column.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> Self {
        with_column!(self, v => Self::from(&v[range]))
    }

    /// Raw bytes of the whole column.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        with_column!(self, v => bytemuck::cast_slice(v.as_slice()))
    }

    /// Raw bytes of `range` (in scalars, not bytes).
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds.
    #[must_use]
    pub fn bytes(&self, range: Range<usize>) -> &[u8] {
        with_column!(self, v => bytemuck::cast_slice(&v[range]))
    }

    /// `f32` view, if this is an `f32` column.
    #[must_use]
    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Self::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable `f32` view.
    pub fn as_f32_mut(&mut self) -> Option<&mut [f32]> {
        match self {
            Self::F32(v) => Some(v),
            _ => None,
        }
    }

    /// `i32` view.
    #[must_use]
    pub fn as_i32(&self) -> Option<&[i32]> {
        match self {
            Self::I32(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable `i32` view.
    pub fn as_i32_mut(&mut self) -> Option<&mut [i32]> {
        match self {
            Self::I32(v) => Some(v),
            _ => None,
        }
    }

    /// `u32` view.
    #[must_use]
    pub fn as_u32(&self) -> Option<&[u32]> {
        match self {
            Self::U32(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable `u32` view.
    pub fn as_u32_mut(&mut self) -> Option<&mut [u32]> {
        match self {
            Self::U32(v) => Some(v),
            _ => None,
        }
    }

    /// `u8` view.
    #[must_use]
    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            Self::U8(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable `u8` view.
    pub fn as_u8_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            Self::U8(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_and_resize() {
        let mut column = Column::filled(Scalar::F32(1.0), 3);
        assert_eq!(column.kind(), ScalarKind::F32);
        column.resize(5, Scalar::F32(2.0));
        assert_eq!(column.as_f32().unwrap(), &[1.0, 1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn test_copy_from_rejects_kind_mismatch() {
        let mut dst = Column::filled(Scalar::U32(0), 4);
        let src = Column::from([7u32, 8, 9]);
        assert!(dst.copy_from(1, &src, 1..3));
        assert_eq!(dst.as_u32().unwrap(), &[0, 8, 9, 0]);

        let floats = Column::from([1.0f32]);
        assert!(!dst.copy_from(0, &floats, 0..1));
        assert_eq!(dst.as_u32().unwrap(), &[0, 8, 9, 0]);
    }

    #[test]
    fn test_bytes_little_endian_layout() {
        let column = Column::from(vec![1u32, 2]);
        assert_eq!(column.as_bytes().len(), 8);
        assert_eq!(column.bytes(1..2), &2u32.to_ne_bytes());
    }

    #[test]
    fn test_fill_casts_default() {
        let mut column = Column::filled(Scalar::U8(0), 4);
        column.fill(2..4, Scalar::U8(9));
        assert_eq!(column.as_u8().unwrap(), &[0, 0, 9, 9]);
        assert_eq!(column.get(3), Some(Scalar::U8(9)));
        assert_eq!(column.get(4), None);
    }

    #[test]
    fn test_extend_and_slice() {
        let mut snapshot = Column::empty(ScalarKind::I32);
        let source = Column::from([1i32, 2, 3, 4]);
        assert!(snapshot.extend_from(&source, 2..4));
        assert!(snapshot.extend_from(&source, 0..1));
        assert_eq!(snapshot, Column::from([3i32, 4, 1]));
        assert_eq!(snapshot.slice(1..3), Column::from([4i32, 1]));
    }
}
