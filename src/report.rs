//! Progress reporting: scheduler events, per-task summaries, run reports.
//!
//! Events are pushed over a tokio mpsc channel by the dispatcher; a
//! [`ProgressReporter`] consumes them. The crate ships [`LogReporter`],
//! which renders events through `tracing`; richer front ends implement
//! the trait themselves.

use crate::core::block::BlockId;
use crate::core::task::TaskId;
use crate::scheduling::pool::WorkerId;
use crate::scheduling::scheduler::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Events emitted by the dispatcher for block and run lifecycle changes.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// A worker has begun invoking the process function on a block.
    BlockStarted {
        task_id: TaskId,
        block_id: BlockId,
        worker_id: WorkerId,
    },
    /// A block's process function returned without fault.
    BlockCompleted { task_id: TaskId, block_id: BlockId },
    /// A block's precheck reported existing output; it was not processed.
    BlockSkipped { task_id: TaskId, block_id: BlockId },
    /// A block faulted but has retry budget left and was re-queued.
    BlockRetried {
        task_id: TaskId,
        block_id: BlockId,
        /// Attempts made so far, counting the one that just faulted.
        attempt: u32,
    },
    /// A block faulted with its retry budget exhausted.
    BlockFailed {
        task_id: TaskId,
        block_id: BlockId,
        fault: String,
    },
    /// A block can never run because an upstream block failed.
    BlockOrphaned { task_id: TaskId, block_id: BlockId },
    /// Blocks of a task were cancelled by an external stop.
    BlocksCancelled { task_id: TaskId, count: u64 },
    /// Updated per-task counters after a state transition.
    Progress { task_id: TaskId, state: TaskState },
    /// Every block of the task reached a terminal state.
    TaskCompleted { task_id: TaskId },
    /// The external stop signal was observed.
    RunCancelled,
    /// Every block across all tasks reached a terminal state.
    RunComplete,
}

/// Consumes scheduler events; push model.
pub trait ProgressReporter: Send + Sync {
    fn on_event(&self, event: &SchedulerEvent);
}

/// Renders scheduler events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn on_event(&self, event: &SchedulerEvent) {
        match event {
            SchedulerEvent::BlockStarted {
                task_id,
                block_id,
                worker_id,
            } => {
                tracing::debug!(task = %task_id, block = %block_id, worker = %worker_id, "block started");
            }
            SchedulerEvent::BlockCompleted { task_id, block_id } => {
                tracing::debug!(task = %task_id, block = %block_id, "block completed");
            }
            SchedulerEvent::BlockSkipped { task_id, block_id } => {
                tracing::debug!(task = %task_id, block = %block_id, "block skipped");
            }
            SchedulerEvent::BlockRetried {
                task_id,
                block_id,
                attempt,
            } => {
                tracing::warn!(task = %task_id, block = %block_id, attempt, "block faulted, retrying");
            }
            SchedulerEvent::BlockFailed {
                task_id,
                block_id,
                fault,
            } => {
                tracing::warn!(task = %task_id, block = %block_id, %fault, "block failed");
            }
            SchedulerEvent::BlockOrphaned { task_id, block_id } => {
                tracing::warn!(task = %task_id, block = %block_id, "block orphaned");
            }
            SchedulerEvent::BlocksCancelled { task_id, count } => {
                tracing::warn!(task = %task_id, count, "blocks cancelled");
            }
            SchedulerEvent::Progress { task_id, state } => {
                tracing::debug!(
                    task = %task_id,
                    ready = state.ready_count,
                    processing = state.processing_count,
                    pending = state.pending_count(),
                    completed = state.completed_count,
                    skipped = state.skipped_count,
                    failed = state.failed_count,
                    orphaned = state.orphaned_count,
                    cancelled = state.cancelled_count,
                    "progress"
                );
            }
            SchedulerEvent::TaskCompleted { task_id } => {
                tracing::info!(task = %task_id, "task completed");
            }
            SchedulerEvent::RunCancelled => {
                tracing::warn!("run cancelled");
            }
            SchedulerEvent::RunComplete => {
                tracing::info!("run complete");
            }
        }
    }
}

/// Aggregated per-task counters at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub num_blocks: u64,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub orphaned: u64,
    pub cancelled: u64,
}

impl ExecutionSummary {
    /// True iff every block completed or was skipped.
    pub fn succeeded(&self) -> bool {
        self.failed == 0 && self.orphaned == 0 && self.cancelled == 0
    }
}

impl From<&TaskState> for ExecutionSummary {
    fn from(state: &TaskState) -> Self {
        Self {
            num_blocks: state.total_block_count,
            completed: state.completed_count,
            skipped: state.skipped_count,
            failed: state.failed_count,
            orphaned: state.orphaned_count,
            cancelled: state.cancelled_count,
        }
    }
}

impl std::fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "blocks={} completed={} skipped={} failed={} orphaned={} cancelled={}",
            self.num_blocks, self.completed, self.skipped, self.failed, self.orphaned, self.cancelled
        )
    }
}

/// The final result of a run: one summary per task, plus timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Per-task summaries, ordered by task id for stable output.
    pub summaries: BTreeMap<TaskId, ExecutionSummary>,
    /// When scheduling began.
    pub started_at: DateTime<Utc>,
    /// When the last block reached a terminal state.
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// True iff no task has failed, orphaned, or cancelled blocks.
    pub fn succeeded(&self) -> bool {
        self.summaries.values().all(|s| s.succeeded())
    }

    /// Wall-clock duration of the run.
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// The summary for one task, if it was part of the run.
    pub fn summary(&self, task_id: &TaskId) -> Option<&ExecutionSummary> {
        self.summaries.get(task_id)
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (task_id, summary) in &self.summaries {
            writeln!(f, "  {}: {}", task_id, summary)?;
        }
        Ok(())
    }
}
