//! Region-of-interest model.
//!
//! A [`Roi`] is an immutable offset+shape pair describing a rectangular
//! sub-range of an N-dimensional integer coordinate space. ROIs are the
//! only geometry the scheduler ever interprets; array contents are opaque
//! to it.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A rectangular region of an N-dimensional coordinate space.
///
/// Invariants: `offset` and `shape` have equal length, and every shape
/// component is non-negative. Both are enforced by [`Roi::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roi {
    offset: Vec<i64>,
    shape: Vec<i64>,
}

impl Roi {
    /// Create a new ROI from an offset and a shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRoi`] if the offset and shape lengths
    /// differ or any shape component is negative.
    pub fn new(offset: Vec<i64>, shape: Vec<i64>) -> Result<Self> {
        if offset.len() != shape.len() {
            return Err(Error::InvalidRoi(format!(
                "offset has {} dimensions but shape has {}",
                offset.len(),
                shape.len()
            )));
        }
        if let Some(s) = shape.iter().find(|&&s| s < 0) {
            return Err(Error::InvalidRoi(format!(
                "negative shape component: {}",
                s
            )));
        }
        Ok(Self { offset, shape })
    }

    /// Number of dimensions.
    pub fn dims(&self) -> usize {
        self.offset.len()
    }

    /// The lower corner of the region, per dimension.
    pub fn offset(&self) -> &[i64] {
        &self.offset
    }

    /// The extent of the region, per dimension.
    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    /// Inclusive start coordinate in dimension `d`.
    pub fn begin(&self, d: usize) -> i64 {
        self.offset[d]
    }

    /// Exclusive end coordinate in dimension `d`.
    pub fn end(&self, d: usize) -> i64 {
        self.offset[d] + self.shape[d]
    }

    /// Total number of coordinates covered by this region.
    pub fn size(&self) -> i64 {
        self.shape.iter().product()
    }

    /// True if the region covers no coordinates.
    pub fn is_empty(&self) -> bool {
        self.shape.iter().any(|&s| s == 0)
    }

    /// Test whether a single point lies inside this region.
    pub fn contains_point(&self, point: &[i64]) -> bool {
        debug_assert_eq!(point.len(), self.dims());
        point
            .iter()
            .enumerate()
            .all(|(d, &p)| p >= self.begin(d) && p < self.end(d))
    }

    /// Test whether `other` lies entirely inside this region.
    ///
    /// An empty region is contained in any region of matching
    /// dimensionality.
    pub fn contains(&self, other: &Roi) -> bool {
        debug_assert_eq!(other.dims(), self.dims());
        if other.is_empty() {
            return true;
        }
        (0..self.dims())
            .all(|d| other.begin(d) >= self.begin(d) && other.end(d) <= self.end(d))
    }

    /// Intersect two regions.
    ///
    /// The result may be empty (zero shape in at least one dimension);
    /// its offset is clamped into `self`'s bounds.
    pub fn intersect(&self, other: &Roi) -> Roi {
        debug_assert_eq!(other.dims(), self.dims());
        let mut offset = Vec::with_capacity(self.dims());
        let mut shape = Vec::with_capacity(self.dims());
        for d in 0..self.dims() {
            let begin = self.begin(d).max(other.begin(d));
            let end = self.end(d).min(other.end(d));
            offset.push(begin);
            shape.push((end - begin).max(0));
        }
        Roi { offset, shape }
    }

    /// Grow the region by a per-dimension margin on both sides.
    ///
    /// Negative amounts shrink; the shape is clamped at zero.
    pub fn grow(&self, by: &[i64]) -> Roi {
        debug_assert_eq!(by.len(), self.dims());
        let offset: Vec<i64> = self
            .offset
            .iter()
            .zip(by)
            .map(|(&o, &b)| o - b)
            .collect();
        let shape: Vec<i64> = self
            .shape
            .iter()
            .zip(by)
            .map(|(&s, &b)| (s + 2 * b).max(0))
            .collect();
        Roi { offset, shape }
    }

    /// Translate the region by a per-dimension amount.
    pub fn shift(&self, by: &[i64]) -> Roi {
        debug_assert_eq!(by.len(), self.dims());
        let offset: Vec<i64> = self
            .offset
            .iter()
            .zip(by)
            .map(|(&o, &b)| o + b)
            .collect();
        Roi {
            offset,
            shape: self.shape.clone(),
        }
    }

    /// Tile this region into a row-major grid of sub-regions.
    ///
    /// Tiles are `block_shape`-sized except at the upper boundary of each
    /// dimension, where the final tile is clipped to this region's bound
    /// (never padded, never overflowing). The returned tiles partition
    /// this region exactly: their union equals it and they are pairwise
    /// disjoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Partition`] if `block_shape` has a different
    /// dimensionality or any non-positive component.
    pub fn tile(&self, block_shape: &[i64]) -> Result<Vec<Roi>> {
        let counts = tile_counts(self, block_shape)?;
        let num_tiles: i64 = counts.iter().product();

        let mut tiles = Vec::with_capacity(num_tiles as usize);
        if num_tiles == 0 {
            return Ok(tiles);
        }

        // Row-major odometer over the grid coordinates.
        let dims = self.dims();
        let mut coords = vec![0i64; dims];
        loop {
            let mut offset = Vec::with_capacity(dims);
            let mut shape = Vec::with_capacity(dims);
            for d in 0..dims {
                let begin = self.begin(d) + coords[d] * block_shape[d];
                let end = (begin + block_shape[d]).min(self.end(d));
                offset.push(begin);
                shape.push(end - begin);
            }
            tiles.push(Roi { offset, shape });

            let mut d = dims;
            loop {
                if d == 0 {
                    return Ok(tiles);
                }
                d -= 1;
                coords[d] += 1;
                if coords[d] < counts[d] {
                    break;
                }
                coords[d] = 0;
            }
        }
    }
}

impl std::fmt::Display for Roi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for d in 0..self.dims() {
            if d > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", self.begin(d), self.end(d))?;
        }
        write!(f, "]")
    }
}

/// Number of tiles per dimension when tiling `total` with `block_shape`.
///
/// The count in each dimension is `ceil(shape / block_shape)`, so a
/// non-divisible extent yields one clipped boundary tile.
pub fn tile_counts(total: &Roi, block_shape: &[i64]) -> Result<Vec<i64>> {
    if block_shape.len() != total.dims() {
        return Err(Error::Partition(format!(
            "block shape has {} dimensions but region has {}",
            block_shape.len(),
            total.dims()
        )));
    }
    if let Some(s) = block_shape.iter().find(|&&s| s <= 0) {
        return Err(Error::Partition(format!(
            "non-positive block shape component: {}",
            s
        )));
    }
    Ok(total
        .shape()
        .iter()
        .zip(block_shape)
        .map(|(&s, &b)| (s + b - 1) / b)
        .collect())
}
