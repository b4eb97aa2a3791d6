//! Logical (index-space) extents of structured patches.
//!
//! Extents are inclusive cell-index ranges, one `[lo, hi]` pair per axis,
//! written on the wire and in setup calls as `[ilo, ihi, jlo, jhi, klo, khi]`
//! (truncated to `2 * dims` values). They are always expressed at a given
//! level's resolution, in the frame of a level-0 mesh refined uniformly to
//! that level.

use crate::mesh_error::GhostError;
use itertools::iproduct;

/// Maximum number of spatial dimensions.
pub const MAX_DIMS: usize = 3;

/// Inclusive index box in `dims` dimensions. Axes `>= dims` are pinned to `[0, 0]`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct LogicalExtents {
    dims: usize,
    lo: [i64; MAX_DIMS],
    hi: [i64; MAX_DIMS],
}

impl LogicalExtents {
    /// Build from the interleaved `[lo0, hi0, lo1, hi1, ...]` form.
    ///
    /// # Errors
    /// `ExtentsLengthMismatch` if `values.len() != 2 * dims`, and
    /// `DimensionMismatch` if `dims` is not 1, 2 or 3.
    pub fn from_slice(dims: usize, values: &[i64]) -> Result<Self, GhostError> {
        if dims == 0 || dims > MAX_DIMS {
            return Err(GhostError::DimensionMismatch {
                expected: MAX_DIMS,
                got: dims,
            });
        }
        if values.len() != 2 * dims {
            return Err(GhostError::ExtentsLengthMismatch {
                expected: 2 * dims,
                got: values.len(),
            });
        }
        let mut lo = [0; MAX_DIMS];
        let mut hi = [0; MAX_DIMS];
        for axis in 0..dims {
            lo[axis] = values[2 * axis];
            hi[axis] = values[2 * axis + 1];
        }
        Ok(Self { dims, lo, hi })
    }

    /// Build directly from corner triples.
    pub fn new(dims: usize, lo: [i64; MAX_DIMS], hi: [i64; MAX_DIMS]) -> Self {
        let mut e = Self { dims, lo, hi };
        for axis in dims..MAX_DIMS {
            e.lo[axis] = 0;
            e.hi[axis] = 0;
        }
        e
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn lo(&self) -> [i64; MAX_DIMS] {
        self.lo
    }

    pub fn hi(&self) -> [i64; MAX_DIMS] {
        self.hi
    }

    /// Interleaved `[lo0, hi0, lo1, hi1, ...]` form.
    pub fn to_vec(&self) -> Vec<i64> {
        (0..self.dims)
            .flat_map(|axis| [self.lo[axis], self.hi[axis]])
            .collect()
    }

    /// True if some axis has `hi < lo`.
    pub fn is_empty(&self) -> bool {
        (0..self.dims).any(|axis| self.hi[axis] < self.lo[axis])
    }

    /// Number of cells along each axis (1 for unused axes).
    pub fn cell_dims(&self) -> [usize; MAX_DIMS] {
        let mut out = [1usize; MAX_DIMS];
        for axis in 0..self.dims {
            out[axis] = (self.hi[axis] - self.lo[axis] + 1).max(0) as usize;
        }
        out
    }

    pub fn num_cells(&self) -> usize {
        self.cell_dims().iter().product()
    }

    /// Intersection, or `None` when the boxes are disjoint.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        debug_assert_eq!(self.dims, other.dims);
        let mut lo = [0; MAX_DIMS];
        let mut hi = [0; MAX_DIMS];
        for axis in 0..self.dims {
            lo[axis] = self.lo[axis].max(other.lo[axis]);
            hi[axis] = self.hi[axis].min(other.hi[axis]);
            if hi[axis] < lo[axis] {
                return None;
            }
        }
        Some(Self::new(self.dims, lo, hi))
    }

    pub fn intersects(&self, other: &Self) -> bool {
        (0..self.dims)
            .all(|axis| self.lo[axis] <= other.hi[axis] && other.lo[axis] <= self.hi[axis])
    }

    /// True if `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Self) -> bool {
        (0..self.dims)
            .all(|axis| self.lo[axis] <= other.lo[axis] && other.hi[axis] <= self.hi[axis])
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &Self) -> Self {
        let mut lo = [0; MAX_DIMS];
        let mut hi = [0; MAX_DIMS];
        for axis in 0..self.dims {
            lo[axis] = self.lo[axis].min(other.lo[axis]);
            hi[axis] = self.hi[axis].max(other.hi[axis]);
        }
        Self::new(self.dims, lo, hi)
    }

    /// Re-express at a finer resolution: cell `c` covers `[c*r, (c+1)*r - 1]`.
    pub fn refine(&self, ratio: &[i64]) -> Self {
        let mut lo = self.lo;
        let mut hi = self.hi;
        for axis in 0..self.dims {
            lo[axis] = self.lo[axis] * ratio[axis];
            hi[axis] = (self.hi[axis] + 1) * ratio[axis] - 1;
        }
        Self::new(self.dims, lo, hi)
    }

    /// Re-express at a coarser resolution: the coarse cells touched by `self`.
    pub fn coarsen(&self, ratio: &[i64]) -> Self {
        let mut lo = self.lo;
        let mut hi = self.hi;
        for axis in 0..self.dims {
            lo[axis] = self.lo[axis].div_euclid(ratio[axis]);
            hi[axis] = self.hi[axis].div_euclid(ratio[axis]);
        }
        Self::new(self.dims, lo, hi)
    }

    /// Every index in the box, `i` fastest.
    pub fn indices(&self) -> impl Iterator<Item = [i64; MAX_DIMS]> + use<> {
        let (lo, hi) = (self.lo, self.hi);
        iproduct!(lo[2]..=hi[2], lo[1]..=hi[1], lo[0]..=hi[0]).map(|(k, j, i)| [i, j, k])
    }

    /// Row-major (i fastest) offset of an index inside this box.
    #[inline]
    pub fn linear_index(&self, ijk: [i64; MAX_DIMS]) -> usize {
        let d = self.cell_dims();
        let i = (ijk[0] - self.lo[0]) as usize;
        let j = (ijk[1] - self.lo[1]) as usize;
        let k = (ijk[2] - self.lo[2]) as usize;
        i + d[0] * (j + d[1] * k)
    }
}
