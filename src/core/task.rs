//! Task data model.
//!
//! A task names a total ROI, a write-block shape, an optional read
//! context, a process function capability, and the upstream tasks it
//! depends on. The scheduler derives the task's blocks from this
//! description and owns their state from then on.

use crate::config::TaskConfig;
use crate::core::block::Block;
use crate::core::roi::Roi;
use crate::error::BlockFault;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Unique identifier for a task, chosen by the caller.
///
/// Task ids are plain names ("blur", "segment", ...) so that upstream
/// references and reports stay human-readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The process function contract.
///
/// The scheduler treats implementations as opaque capabilities: they
/// receive a block (read ROI and write ROI) and either succeed or return
/// a [`BlockFault`]. Implementations are expected to be idempotent when
/// re-invoked on retry, and may block on I/O; workers run them on the
/// blocking thread pool.
pub trait BlockProcessor: Send + Sync {
    /// Process one block.
    fn process(&self, block: &Block) -> std::result::Result<(), BlockFault>;

    /// Precheck whether the block's output already exists.
    ///
    /// Returning `true` skips the block: it is counted as skipped in the
    /// summary and satisfies downstream dependencies like a success.
    fn check(&self, _block: &Block) -> bool {
        false
    }
}

impl<F> BlockProcessor for F
where
    F: Fn(&Block) -> std::result::Result<(), BlockFault> + Send + Sync,
{
    fn process(&self, block: &Block) -> std::result::Result<(), BlockFault> {
        self(block)
    }
}

/// A named blockwise processing task.
///
/// # Example
///
/// ```ignore
/// use blockwise::{Roi, Task, TaskConfig};
///
/// let task = Task::new(
///     "blur",
///     Roi::new(vec![0, 0], vec![1024, 1024])?,
///     vec![128, 128],
///     |block: &Block| { /* read, process, write */ Ok(()) },
/// )
/// .with_context(vec![8, 8])
/// .with_config(TaskConfig { num_workers: 4, retry_budget: 2 });
/// ```
#[derive(Clone)]
pub struct Task {
    /// Unique name of this task.
    pub id: TaskId,
    /// The full region this task writes, tiled into blocks.
    pub total_roi: Roi,
    /// Shape of one write block; boundary blocks are clipped.
    pub write_shape: Vec<i64>,
    /// Per-dimension margin added to each block's read ROI (halo).
    pub context: Vec<i64>,
    /// Worker count and retry budget for this task.
    pub config: TaskConfig,
    /// Tasks whose blocks must succeed before ours can become ready.
    pub upstream: Vec<TaskId>,
    processor: Arc<dyn BlockProcessor>,
}

impl Task {
    /// Create a new task with zero context, default config, and no
    /// upstream dependencies.
    pub fn new(
        id: impl Into<TaskId>,
        total_roi: Roi,
        write_shape: Vec<i64>,
        processor: impl BlockProcessor + 'static,
    ) -> Self {
        let context = vec![0; total_roi.dims()];
        Self {
            id: id.into(),
            total_roi,
            write_shape,
            context,
            config: TaskConfig::default(),
            upstream: Vec::new(),
            processor: Arc::new(processor),
        }
    }

    /// Set the read context (halo) added around each block's write ROI.
    pub fn with_context(mut self, context: Vec<i64>) -> Self {
        self.context = context;
        self
    }

    /// Set the worker count and retry budget.
    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    /// Declare a dependency on an upstream task.
    pub fn depends_on(mut self, upstream: impl Into<TaskId>) -> Self {
        self.upstream.push(upstream.into());
        self
    }

    /// The process function capability for this task's blocks.
    pub fn processor(&self) -> Arc<dyn BlockProcessor> {
        Arc::clone(&self.processor)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("total_roi", &self.total_roi)
            .field("write_shape", &self.write_shape)
            .field("context", &self.context)
            .field("config", &self.config)
            .field("upstream", &self.upstream)
            .finish()
    }
}
