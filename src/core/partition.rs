//! Block partitioner.
//!
//! Divides a task's total ROI into a row-major grid of blocks. Write
//! ROIs are pairwise disjoint and their union equals the total ROI; read
//! ROIs are write ROIs grown by the task's context, clipped to the grown
//! total so halo reads never extend past the readable space.

use crate::core::block::{Block, BlockId};
use crate::core::roi::{tile_counts, Roi};
use crate::core::task::Task;
use crate::error::{Error, Result};

/// The write-block grid of one task.
///
/// Knows how many blocks the task has and which block ids a region
/// overlaps, which is all the dependency resolution needs.
#[derive(Debug, Clone)]
pub struct Grid {
    total: Roi,
    write_shape: Vec<i64>,
    counts: Vec<i64>,
}

impl Grid {
    /// Build the grid for a total ROI and write-block shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Partition`] for dimension mismatches or
    /// non-positive block shape components.
    pub fn new(total: &Roi, write_shape: &[i64]) -> Result<Self> {
        let counts = tile_counts(total, write_shape)?;
        Ok(Self {
            total: total.clone(),
            write_shape: write_shape.to_vec(),
            counts,
        })
    }

    /// Total number of blocks in the grid.
    pub fn num_blocks(&self) -> u64 {
        self.counts.iter().product::<i64>() as u64
    }

    /// Blocks per dimension.
    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    /// Row-major linear index of a grid coordinate.
    pub fn index(&self, coords: &[i64]) -> BlockId {
        debug_assert_eq!(coords.len(), self.counts.len());
        let mut index: u64 = 0;
        for (d, &c) in coords.iter().enumerate() {
            index = index * self.counts[d] as u64 + c as u64;
        }
        BlockId(index)
    }

    /// Ids of all blocks whose write ROI intersects `query`, ascending.
    pub fn intersecting(&self, query: &Roi) -> Vec<BlockId> {
        let clipped = self.total.intersect(query);
        if clipped.is_empty() || self.num_blocks() == 0 {
            return Vec::new();
        }

        let dims = self.counts.len();
        let mut first = Vec::with_capacity(dims);
        let mut last = Vec::with_capacity(dims);
        for d in 0..dims {
            let begin = clipped.begin(d) - self.total.begin(d);
            let end = clipped.end(d) - self.total.begin(d);
            first.push(begin / self.write_shape[d]);
            last.push((end - 1) / self.write_shape[d]);
        }

        let mut ids = Vec::new();
        let mut coords = first.clone();
        loop {
            ids.push(self.index(&coords));
            let mut d = dims;
            loop {
                if d == 0 {
                    return ids;
                }
                d -= 1;
                coords[d] += 1;
                if coords[d] <= last[d] {
                    break;
                }
                coords[d] = first[d];
            }
        }
    }
}

/// Produce the ordered block sequence for a task.
///
/// Blocks come out in row-major order with `BlockId` equal to their grid
/// index, so retries and re-runs address the same identity.
///
/// # Errors
///
/// Returns [`Error::Partition`] if the write shape or context does not
/// match the task's dimensionality, or if any context component is
/// negative.
pub fn partition(task: &Task) -> Result<Vec<Block>> {
    let dims = task.total_roi.dims();
    if task.context.len() != dims {
        return Err(Error::Partition(format!(
            "task '{}': context has {} dimensions but region has {}",
            task.id,
            task.context.len(),
            dims
        )));
    }
    if let Some(c) = task.context.iter().find(|&&c| c < 0) {
        return Err(Error::Partition(format!(
            "task '{}': negative context component: {}",
            task.id, c
        )));
    }

    let tiles = task.total_roi.tile(&task.write_shape)?;
    let readable = task.total_roi.grow(&task.context);

    let blocks = tiles
        .into_iter()
        .enumerate()
        .map(|(i, write_roi)| {
            let read_roi = write_roi.grow(&task.context).intersect(&readable);
            Block::new(task.id.clone(), BlockId(i as u64), read_roi, write_roi)
        })
        .collect();
    Ok(blocks)
}
