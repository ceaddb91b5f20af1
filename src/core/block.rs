//! Block data model.
//!
//! Blocks are the unit of schedulable work. Each block carries a read ROI
//! (write ROI grown by the task's context) and a write ROI, and progresses
//! through the [`BlockStatus`] lifecycle driven exclusively by the
//! scheduler.

use crate::core::roi::Roi;
use crate::core::task::TaskId;
use serde::{Deserialize, Serialize};

/// Unique identifier for a block within its task.
///
/// The id is the row-major linear index of the block's grid position in
/// the task's write grid, so it is stable across retries and re-runs:
/// the same region always maps to the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u64);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Block status in its lifecycle.
///
/// `Pending -> Ready -> Claimed -> Running -> {Success | Skipped | Failed}`.
/// A terminal failure propagates `Orphaned` to dependent blocks; an
/// external stop produces `Cancelled` for blocks that have not started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    /// Waiting on upstream blocks.
    #[default]
    Pending,
    /// All dependencies satisfied; queued for a worker.
    Ready,
    /// Handed to a worker slot, not yet executing.
    Claimed,
    /// Process function is executing.
    Running,
    /// Process function returned without fault.
    Success,
    /// Precheck reported the block's output already exists.
    Skipped,
    /// Process function faulted and the retry budget is exhausted.
    Failed,
    /// An upstream block failed terminally; this block can never run.
    Orphaned,
    /// The run was stopped before this block started.
    Cancelled,
}

impl BlockStatus {
    /// True for states a block never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BlockStatus::Success
                | BlockStatus::Skipped
                | BlockStatus::Failed
                | BlockStatus::Orphaned
                | BlockStatus::Cancelled
        )
    }

    /// True for states that satisfy downstream dependencies.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, BlockStatus::Success | BlockStatus::Skipped)
    }
}

impl std::fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BlockStatus::Pending => "pending",
            BlockStatus::Ready => "ready",
            BlockStatus::Claimed => "claimed",
            BlockStatus::Running => "running",
            BlockStatus::Success => "success",
            BlockStatus::Skipped => "skipped",
            BlockStatus::Failed => "failed",
            BlockStatus::Orphaned => "orphaned",
            BlockStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// A unit of schedulable work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The task this block belongs to.
    pub task_id: TaskId,
    /// Stable identity derived from the block's grid position.
    pub id: BlockId,
    /// Region the process function may read, including context.
    pub read_roi: Roi,
    /// Region the process function writes. Write ROIs of one task are
    /// pairwise disjoint and tile the task's total ROI.
    pub write_roi: Roi,
    /// Current lifecycle status.
    pub status: BlockStatus,
    /// Number of times the process function has been invoked for this
    /// block, counting retries.
    pub attempts: u32,
}

impl Block {
    /// Create a new pending block.
    pub fn new(task_id: TaskId, id: BlockId, read_roi: Roi, write_roi: Roi) -> Self {
        Self {
            task_id,
            id,
            read_roi,
            write_roi,
            status: BlockStatus::Pending,
            attempts: 0,
        }
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} write={} read={} ({})",
            self.task_id, self.id, self.write_roi, self.read_roi, self.status
        )
    }
}
