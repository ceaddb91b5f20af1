//! The scheduler state machine.
//!
//! The Scheduler owns every block's state and is the only place block
//! transitions happen. It is a synchronous structure: the dispatcher task
//! drives it one transition at a time (single-writer discipline), workers
//! never touch it directly. Upon request it hands out the next ready
//! block of a task and folds reported outcomes back into per-task
//! counters, retry bookkeeping, dependency resolution, and orphan
//! propagation.

use crate::core::block::{Block, BlockId, BlockStatus};
use crate::core::graph::TaskGraph;
use crate::core::partition::partition;
use crate::core::task::{Task, TaskId};
use crate::error::{BlockFault, Result};
use crate::report::{ExecutionSummary, RunReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Outcome of one block execution attempt, reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The process function returned without fault.
    Success,
    /// The precheck reported the block's output already exists.
    Skipped,
    /// The process function faulted.
    Failed(BlockFault),
}

/// Per-task block counters.
///
/// `pending` is not stored: it is the remainder once every other
/// category is accounted for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub total_block_count: u64,
    pub ready_count: u64,
    /// Blocks claimed by or running on a worker.
    pub processing_count: u64,
    pub completed_count: u64,
    pub skipped_count: u64,
    pub failed_count: u64,
    pub orphaned_count: u64,
    pub cancelled_count: u64,
    /// True once the first block of this task was handed to a worker.
    pub started: bool,
}

impl TaskState {
    /// Blocks still waiting on upstream dependencies.
    pub fn pending_count(&self) -> u64 {
        self.total_block_count
            - (self.ready_count
                + self.processing_count
                + self.completed_count
                + self.skipped_count
                + self.failed_count
                + self.orphaned_count
                + self.cancelled_count)
    }

    /// True once every block is in a terminal state.
    pub fn is_done(&self) -> bool {
        self.completed_count
            + self.skipped_count
            + self.failed_count
            + self.orphaned_count
            + self.cancelled_count
            == self.total_block_count
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total={} ready={} processing={} pending={} completed={} skipped={} failed={} orphaned={} cancelled={}",
            self.total_block_count,
            self.ready_count,
            self.processing_count,
            self.pending_count(),
            self.completed_count,
            self.skipped_count,
            self.failed_count,
            self.orphaned_count,
            self.cancelled_count,
        )
    }
}

/// What releasing a block did, so the dispatcher can emit events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseEffect {
    Completed,
    Skipped,
    /// Faulted with budget left; the block went back to the ready queue.
    Retried { attempt: u32 },
    /// Faulted terminally.
    Failed { fault: String },
}

/// Result of [`Scheduler::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseResult {
    pub effect: ReleaseEffect,
    /// Blocks orphaned (transitively) by a terminal failure.
    pub orphaned: Vec<(TaskId, BlockId)>,
    /// Tasks whose state changed, including the released block's own.
    pub updated_tasks: Vec<TaskId>,
}

/// Per-task block storage.
struct TaskBlocks {
    /// All blocks, indexed by `BlockId` (row-major grid index).
    blocks: Vec<Block>,
    /// FIFO of ready block ids in discovery order. May contain stale
    /// entries for blocks that were orphaned or cancelled after being
    /// queued; [`Scheduler::acquire`] skips those.
    ready_queue: VecDeque<BlockId>,
    /// Unsatisfied upstream-block counts for pending blocks.
    deps_remaining: HashMap<BlockId, usize>,
}

/// Tracks the state of every block across all tasks.
///
/// Constructed from a validated task list; all graph errors surface here
/// before any block executes.
pub struct Scheduler {
    graph: TaskGraph,
    task_blocks: HashMap<TaskId, TaskBlocks>,
    task_states: HashMap<TaskId, TaskState>,
    started_at: DateTime<Utc>,
    cancelled: bool,
}

impl Scheduler {
    /// Build the scheduler: validate the task graph, partition every
    /// task into blocks, and compute initial readiness.
    ///
    /// Blocks of root tasks are ready immediately, as are blocks of
    /// downstream tasks whose read ROI overlaps no upstream block at all
    /// (a downstream total extending past its upstream's bounds).
    pub fn new(tasks: Vec<Task>) -> Result<Self> {
        let graph = TaskGraph::new(tasks)?;

        let mut task_blocks = HashMap::new();
        let mut task_states = HashMap::new();

        for task in graph.tasks() {
            let blocks = partition(task)?;
            let state = TaskState {
                total_block_count: blocks.len() as u64,
                ..TaskState::default()
            };
            task_states.insert(task.id.clone(), state);
            task_blocks.insert(
                task.id.clone(),
                TaskBlocks {
                    blocks,
                    ready_queue: VecDeque::new(),
                    deps_remaining: HashMap::new(),
                },
            );
        }

        for task in graph.tasks() {
            let is_root = graph.is_root(&task.id);
            let tb = match task_blocks.get_mut(&task.id) {
                Some(tb) => tb,
                None => continue,
            };
            let mut ready = 0u64;
            for i in 0..tb.blocks.len() {
                let deps = if is_root {
                    0
                } else {
                    graph.upstream_blocks(&tb.blocks[i]).len()
                };
                let id = BlockId(i as u64);
                if deps == 0 {
                    tb.blocks[i].status = BlockStatus::Ready;
                    tb.ready_queue.push_back(id);
                    ready += 1;
                } else {
                    tb.deps_remaining.insert(id, deps);
                }
            }
            if let Some(state) = task_states.get_mut(&task.id) {
                state.ready_count = ready;
            }
        }

        Ok(Self {
            graph,
            task_blocks,
            task_states,
            started_at: Utc::now(),
            cancelled: false,
        })
    }

    /// The validated task graph.
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// The counters of a task.
    pub fn task_state(&self, id: &TaskId) -> Option<&TaskState> {
        self.task_states.get(id)
    }

    /// The status of a single block.
    pub fn block_status(&self, task_id: &TaskId, block_id: BlockId) -> Option<BlockStatus> {
        self.task_blocks
            .get(task_id)
            .and_then(|tb| tb.blocks.get(block_id.0 as usize))
            .map(|b| b.status)
    }

    /// Tasks that currently have at least one ready block, sorted by id.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        let mut tasks: Vec<TaskId> = self
            .task_states
            .iter()
            .filter(|(_, s)| s.ready_count > 0)
            .map(|(id, _)| id.clone())
            .collect();
        tasks.sort();
        tasks
    }

    /// True once every block across all tasks is terminal.
    pub fn is_done(&self) -> bool {
        self.task_states.values().all(|s| s.is_done())
    }

    /// True once a claim for this task can never be fulfilled again:
    /// the task is done, or the run was cancelled (no block will become
    /// ready anymore).
    pub fn is_drained(&self, task_id: &TaskId) -> bool {
        self.cancelled
            || self
                .task_states
                .get(task_id)
                .map(|s| s.is_done())
                .unwrap_or(true)
    }

    /// Hand out the next ready block of a task, FIFO in discovery order.
    ///
    /// The block transitions to Claimed and its attempt counter is
    /// incremented. Returns None when no block is currently ready.
    pub fn acquire(&mut self, task_id: &TaskId) -> Option<Block> {
        let tb = self.task_blocks.get_mut(task_id)?;
        while let Some(id) = tb.ready_queue.pop_front() {
            let block = &mut tb.blocks[id.0 as usize];
            if block.status != BlockStatus::Ready {
                // Stale queue entry: orphaned or cancelled after queueing.
                continue;
            }
            block.status = BlockStatus::Claimed;
            block.attempts += 1;
            if let Some(state) = self.task_states.get_mut(task_id) {
                state.ready_count -= 1;
                state.processing_count += 1;
                state.started = true;
            }
            return Some(block.clone());
        }
        None
    }

    /// Undo a claim whose worker disappeared before delivery: the block
    /// returns to the front of the ready queue with its attempt counter
    /// rolled back, since the process function was never invoked.
    pub fn requeue(&mut self, task_id: &TaskId, block_id: BlockId) {
        if let Some(tb) = self.task_blocks.get_mut(task_id) {
            if let Some(block) = tb.blocks.get_mut(block_id.0 as usize) {
                if block.status == BlockStatus::Claimed {
                    block.status = BlockStatus::Ready;
                    block.attempts -= 1;
                    tb.ready_queue.push_front(block_id);
                    if let Some(state) = self.task_states.get_mut(task_id) {
                        state.ready_count += 1;
                        state.processing_count -= 1;
                    }
                }
            }
        }
    }

    /// Record that a worker has begun invoking the process function.
    pub fn mark_running(&mut self, task_id: &TaskId, block_id: BlockId) {
        if let Some(tb) = self.task_blocks.get_mut(task_id) {
            if let Some(block) = tb.blocks.get_mut(block_id.0 as usize) {
                if block.status == BlockStatus::Claimed {
                    block.status = BlockStatus::Running;
                }
            }
        }
    }

    /// Fold a reported outcome back into the state table.
    ///
    /// Success and Skipped satisfy downstream dependencies and may make
    /// new blocks ready. A fault either re-queues the block (budget
    /// left) or fails it terminally and orphans its transitive
    /// dependents.
    pub fn release(
        &mut self,
        task_id: &TaskId,
        block_id: BlockId,
        outcome: BlockOutcome,
    ) -> ReleaseResult {
        let mut updated = vec![task_id.clone()];

        let (attempts, block_snapshot) = {
            let tb = match self.task_blocks.get_mut(task_id) {
                Some(tb) => tb,
                None => {
                    return ReleaseResult {
                        effect: ReleaseEffect::Failed {
                            fault: format!("unknown task: {}", task_id),
                        },
                        orphaned: Vec::new(),
                        updated_tasks: Vec::new(),
                    }
                }
            };
            let block = &tb.blocks[block_id.0 as usize];
            (block.attempts, block.clone())
        };
        if let Some(state) = self.task_states.get_mut(task_id) {
            state.processing_count -= 1;
        }

        match outcome {
            BlockOutcome::Success | BlockOutcome::Skipped => {
                let skipped = outcome == BlockOutcome::Skipped;
                self.set_status(
                    task_id,
                    block_id,
                    if skipped {
                        BlockStatus::Skipped
                    } else {
                        BlockStatus::Success
                    },
                );
                if let Some(state) = self.task_states.get_mut(task_id) {
                    if skipped {
                        state.skipped_count += 1;
                    } else {
                        state.completed_count += 1;
                    }
                }
                for t in self.satisfy_dependents(&block_snapshot) {
                    if !updated.contains(&t) {
                        updated.push(t);
                    }
                }
                ReleaseResult {
                    effect: if skipped {
                        ReleaseEffect::Skipped
                    } else {
                        ReleaseEffect::Completed
                    },
                    orphaned: Vec::new(),
                    updated_tasks: updated,
                }
            }
            BlockOutcome::Failed(fault) => {
                let budget = self
                    .graph
                    .task(task_id)
                    .map(|t| t.config.retry_budget)
                    .unwrap_or(0);
                if attempts <= budget {
                    // Budget left: same identity goes back to the queue.
                    self.set_status(task_id, block_id, BlockStatus::Ready);
                    if let Some(tb) = self.task_blocks.get_mut(task_id) {
                        tb.ready_queue.push_back(block_id);
                    }
                    if let Some(state) = self.task_states.get_mut(task_id) {
                        state.ready_count += 1;
                    }
                    ReleaseResult {
                        effect: ReleaseEffect::Retried { attempt: attempts },
                        orphaned: Vec::new(),
                        updated_tasks: updated,
                    }
                } else {
                    self.set_status(task_id, block_id, BlockStatus::Failed);
                    if let Some(state) = self.task_states.get_mut(task_id) {
                        state.failed_count += 1;
                    }
                    let orphaned = self.orphan_dependents(&block_snapshot);
                    for (t, _) in &orphaned {
                        if !updated.contains(t) {
                            updated.push(t.clone());
                        }
                    }
                    ReleaseResult {
                        effect: ReleaseEffect::Failed {
                            fault: fault.message,
                        },
                        orphaned,
                        updated_tasks: updated,
                    }
                }
            }
        }
    }

    /// External stop: every Pending or Ready block becomes Cancelled.
    /// Claimed and Running blocks are left to finish.
    ///
    /// Returns the number of blocks cancelled per task.
    pub fn cancel(&mut self) -> Vec<(TaskId, u64)> {
        self.cancelled = true;
        let mut counts = Vec::new();
        for (task_id, tb) in &mut self.task_blocks {
            let mut cancelled = 0u64;
            let mut was_ready = 0u64;
            for block in &mut tb.blocks {
                match block.status {
                    BlockStatus::Pending => {
                        block.status = BlockStatus::Cancelled;
                        cancelled += 1;
                    }
                    BlockStatus::Ready => {
                        block.status = BlockStatus::Cancelled;
                        cancelled += 1;
                        was_ready += 1;
                    }
                    _ => {}
                }
            }
            if let Some(state) = self.task_states.get_mut(task_id) {
                state.ready_count -= was_ready;
                state.cancelled_count += cancelled;
            }
            if cancelled > 0 {
                counts.push((task_id.clone(), cancelled));
            }
        }
        counts.sort();
        counts
    }

    /// Hard stop: additionally cancel Claimed and Running blocks whose
    /// outcomes will never be collected.
    pub fn cancel_in_flight(&mut self) -> Vec<(TaskId, u64)> {
        let mut counts = Vec::new();
        for (task_id, tb) in &mut self.task_blocks {
            let mut cancelled = 0u64;
            for block in &mut tb.blocks {
                if matches!(block.status, BlockStatus::Claimed | BlockStatus::Running) {
                    block.status = BlockStatus::Cancelled;
                    cancelled += 1;
                }
            }
            if let Some(state) = self.task_states.get_mut(task_id) {
                state.processing_count -= cancelled;
                state.cancelled_count += cancelled;
            }
            if cancelled > 0 {
                counts.push((task_id.clone(), cancelled));
            }
        }
        counts.sort();
        counts
    }

    /// The final per-task summaries.
    pub fn report(&self) -> RunReport {
        let summaries: BTreeMap<TaskId, ExecutionSummary> = self
            .task_states
            .iter()
            .map(|(id, state)| (id.clone(), ExecutionSummary::from(state)))
            .collect();
        RunReport {
            summaries,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }

    fn set_status(&mut self, task_id: &TaskId, block_id: BlockId, status: BlockStatus) {
        if let Some(tb) = self.task_blocks.get_mut(task_id) {
            if let Some(block) = tb.blocks.get_mut(block_id.0 as usize) {
                block.status = status;
            }
        }
    }

    /// Decrement dependency counts of the blocks downstream of a
    /// satisfied block; returns the tasks that gained ready blocks.
    fn satisfy_dependents(&mut self, block: &Block) -> Vec<TaskId> {
        let mut newly_ready = Vec::new();
        for (down_task, down_id) in self.graph.downstream_blocks(block) {
            let tb = match self.task_blocks.get_mut(&down_task) {
                Some(tb) => tb,
                None => continue,
            };
            if tb.blocks[down_id.0 as usize].status != BlockStatus::Pending {
                continue;
            }
            let satisfied = match tb.deps_remaining.get_mut(&down_id) {
                Some(remaining) => {
                    *remaining -= 1;
                    *remaining == 0
                }
                None => false,
            };
            if satisfied {
                tb.deps_remaining.remove(&down_id);
                tb.blocks[down_id.0 as usize].status = BlockStatus::Ready;
                tb.ready_queue.push_back(down_id);
                if let Some(state) = self.task_states.get_mut(&down_task) {
                    state.ready_count += 1;
                }
                if !newly_ready.contains(&down_task) {
                    newly_ready.push(down_task.clone());
                }
            }
        }
        newly_ready
    }

    /// Transitively orphan every block depending on a failed block.
    fn orphan_dependents(&mut self, failed: &Block) -> Vec<(TaskId, BlockId)> {
        let mut orphaned = Vec::new();
        let mut frontier = self.graph.downstream_blocks(failed);

        while let Some((task_id, block_id)) = frontier.pop() {
            let tb = match self.task_blocks.get_mut(&task_id) {
                Some(tb) => tb,
                None => continue,
            };
            let block = &mut tb.blocks[block_id.0 as usize];
            let was_ready = match block.status {
                BlockStatus::Pending => false,
                BlockStatus::Ready => true,
                // Terminal or in flight: nothing to orphan here.
                _ => continue,
            };
            block.status = BlockStatus::Orphaned;
            tb.deps_remaining.remove(&block_id);
            let snapshot = block.clone();
            if let Some(state) = self.task_states.get_mut(&task_id) {
                if was_ready {
                    state.ready_count -= 1;
                }
                state.orphaned_count += 1;
            }
            orphaned.push((task_id, block_id));
            frontier.extend(self.graph.downstream_blocks(&snapshot));
        }

        orphaned.sort();
        orphaned
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.task_states.len())
            .field("cancelled", &self.cancelled)
            .finish()
    }
}
