//! Typed auxiliary arrays attached to a mesh (point data / cell data).
//!
//! `DataArray` is a tagged union over a fixed set of element types. Generic
//! code works through the [`Element`] trait and dispatches once on
//! [`DataArray::tag`].

use crate::mesh_error::GhostError;
use bytemuck::Pod;
use num_traits::NumCast;

/// Element type of a [`DataArray`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum ElementTag {
    U8 = 1,
    I32 = 2,
    I64 = 3,
    F32 = 4,
    F64 = 5,
}

impl ElementTag {
    pub fn name(self) -> &'static str {
        match self {
            ElementTag::U8 => "u8",
            ElementTag::I32 => "i32",
            ElementTag::I64 => "i64",
            ElementTag::F32 => "f32",
            ElementTag::F64 => "f64",
        }
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            1 => ElementTag::U8,
            2 => ElementTag::I32,
            3 => ElementTag::I64,
            4 => ElementTag::F32,
            5 => ElementTag::F64,
            _ => return None,
        })
    }
}

/// Backing storage for a [`DataArray`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ArrayValues {
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Numeric element that can live in a [`DataArray`] and travel on the wire.
pub trait Element: Pod + NumCast + Default + PartialEq + Send + Sync + 'static {
    const TAG: ElementTag;
    fn view(values: &ArrayValues) -> Option<&[Self]>;
    fn view_mut(values: &mut ArrayValues) -> Option<&mut Vec<Self>>;
    fn wrap(values: Vec<Self>) -> ArrayValues;

    /// The value with its bytes in little-endian order. Applying it twice is
    /// the identity, so it both encodes and decodes.
    #[inline]
    fn le_order(mut self) -> Self {
        if cfg!(target_endian = "big") {
            bytemuck::bytes_of_mut(&mut self).reverse();
        }
        self
    }
}

macro_rules! impl_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const TAG: ElementTag = ElementTag::$variant;
            #[inline]
            fn view(values: &ArrayValues) -> Option<&[Self]> {
                match values {
                    ArrayValues::$variant(v) => Some(v),
                    _ => None,
                }
            }
            #[inline]
            fn view_mut(values: &mut ArrayValues) -> Option<&mut Vec<Self>> {
                match values {
                    ArrayValues::$variant(v) => Some(v),
                    _ => None,
                }
            }
            #[inline]
            fn wrap(values: Vec<Self>) -> ArrayValues {
                ArrayValues::$variant(values)
            }
        }
    };
}

impl_element!(u8, U8);
impl_element!(i32, I32);
impl_element!(i64, I64);
impl_element!(f32, F32);
impl_element!(f64, F64);

/// A per-point or per-cell array with `components` values per tuple.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DataArray {
    components: usize,
    values: ArrayValues,
}

impl DataArray {
    /// Wrap `values` as tuples of `components` entries.
    ///
    /// # Panics
    /// Panics if `components == 0` or `values.len()` is not a multiple of it.
    pub fn new<T: Element>(components: usize, values: Vec<T>) -> Self {
        assert!(components > 0, "DataArray needs at least one component");
        assert_eq!(
            values.len() % components,
            0,
            "DataArray length must be a multiple of its component count"
        );
        Self {
            components,
            values: T::wrap(values),
        }
    }

    pub fn scalar<T: Element>(values: Vec<T>) -> Self {
        Self::new(1, values)
    }

    /// `tuples` tuples filled with `T::default()`.
    pub fn zeroed<T: Element>(components: usize, tuples: usize) -> Self {
        Self::new(components, vec![T::default(); components * tuples])
    }

    pub fn tag(&self) -> ElementTag {
        match &self.values {
            ArrayValues::U8(_) => ElementTag::U8,
            ArrayValues::I32(_) => ElementTag::I32,
            ArrayValues::I64(_) => ElementTag::I64,
            ArrayValues::F32(_) => ElementTag::F32,
            ArrayValues::F64(_) => ElementTag::F64,
        }
    }

    pub fn components(&self) -> usize {
        self.components
    }

    fn raw_len(&self) -> usize {
        match &self.values {
            ArrayValues::U8(v) => v.len(),
            ArrayValues::I32(v) => v.len(),
            ArrayValues::I64(v) => v.len(),
            ArrayValues::F32(v) => v.len(),
            ArrayValues::F64(v) => v.len(),
        }
    }

    /// Number of tuples.
    pub fn len(&self) -> usize {
        self.raw_len() / self.components
    }

    pub fn is_empty(&self) -> bool {
        self.raw_len() == 0
    }

    pub fn values(&self) -> &ArrayValues {
        &self.values
    }

    pub fn into_values(self) -> ArrayValues {
        self.values
    }

    /// Typed view, or `None` if `T` is not the element type.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::view(&self.values)
    }

    /// Typed view, or `ArrayTypeMismatch`.
    pub fn try_as_slice<T: Element>(&self) -> Result<&[T], GhostError> {
        T::view(&self.values).ok_or(GhostError::ArrayTypeMismatch {
            expected: T::TAG.name(),
            got: self.tag().name(),
        })
    }

    pub fn as_vec_mut<T: Element>(&mut self) -> Option<&mut Vec<T>> {
        T::view_mut(&mut self.values)
    }

    /// One tuple as a slice.
    pub fn tuple<T: Element>(&self, idx: usize) -> Option<&[T]> {
        let c = self.components;
        self.as_slice::<T>()
            .and_then(|v| v.get(idx * c..(idx + 1) * c))
    }

    /// Value converted to `f64`, whatever the element type.
    pub fn get_f64(&self, idx: usize, component: usize) -> Option<f64> {
        let at = idx * self.components + component;
        match &self.values {
            ArrayValues::U8(v) => v.get(at).and_then(|x| <f64 as NumCast>::from(*x)),
            ArrayValues::I32(v) => v.get(at).and_then(|x| <f64 as NumCast>::from(*x)),
            ArrayValues::I64(v) => v.get(at).and_then(|x| <f64 as NumCast>::from(*x)),
            ArrayValues::F32(v) => v.get(at).and_then(|x| <f64 as NumCast>::from(*x)),
            ArrayValues::F64(v) => v.get(at).copied(),
        }
    }

    /// Copy the listed tuples, in order, into a flat vector.
    pub fn gather_tuples<T: Element>(&self, tuples: &[usize]) -> Result<Vec<T>, GhostError> {
        let src = self.try_as_slice::<T>()?;
        let c = self.components;
        let mut out = Vec::with_capacity(tuples.len() * c);
        for &t in tuples {
            let slice = src
                .get(t * c..(t + 1) * c)
                .ok_or(GhostError::IndexOutOfRange {
                    index: t,
                    len: src.len() / c,
                })?;
            out.extend_from_slice(slice);
        }
        Ok(out)
    }

    /// Append flat tuple data of the matching element type.
    pub fn extend_from<T: Element>(&mut self, flat: &[T]) -> Result<(), GhostError> {
        if flat.len() % self.components != 0 {
            return Err(GhostError::ComponentMismatch {
                expected: self.components,
                got: flat.len() % self.components,
            });
        }
        let tag = self.tag();
        let v = T::view_mut(&mut self.values).ok_or(GhostError::ArrayTypeMismatch {
            expected: tag.name(),
            got: T::TAG.name(),
        })?;
        v.extend_from_slice(flat);
        Ok(())
    }
}
