//! Worker pools.
//!
//! Each task gets its own fixed-size pool of workers. A worker is a
//! tokio task that loops: claim a block from the dispatcher, invoke the
//! process function on the blocking thread pool, report the outcome,
//! repeat. Workers hold at most one block at a time and never mutate
//! block state; all communication is message passing.

use crate::core::block::{Block, BlockId};
use crate::core::task::{BlockProcessor, Task, TaskId};
use crate::error::BlockFault;
use crate::scheduling::scheduler::BlockOutcome;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Unique identifier for a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    /// Create a new unique worker identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages workers send to the dispatcher.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Request the next ready block of a task. The reply may be deferred
    /// until a block becomes ready or the task is drained.
    Claim {
        task_id: TaskId,
        worker_id: WorkerId,
        reply: oneshot::Sender<ClaimReply>,
    },
    /// The worker has begun invoking the process function.
    Started {
        task_id: TaskId,
        block_id: BlockId,
        worker_id: WorkerId,
    },
    /// The outcome of one block execution attempt.
    Release {
        task_id: TaskId,
        block_id: BlockId,
        worker_id: WorkerId,
        outcome: BlockOutcome,
    },
}

/// The dispatcher's answer to a claim request.
#[derive(Debug)]
pub enum ClaimReply {
    /// A block to execute.
    Assigned(Block),
    /// The task will never yield another block; the worker should exit.
    Drained,
}

/// A task's pool of worker tasks.
///
/// Pool size is the task's `config.num_workers`, with a floor of one so
/// a misconfigured task cannot stall the run.
pub struct WorkerPool {
    task_id: TaskId,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn the workers for a task.
    pub fn spawn(task: &Task, tx: mpsc::Sender<WorkerMessage>) -> Self {
        let size = task.config.num_workers.max(1);
        let handles = (0..size)
            .map(|_| {
                let worker_id = WorkerId::new();
                tokio::spawn(worker_loop(
                    worker_id,
                    task.id.clone(),
                    task.processor(),
                    tx.clone(),
                ))
            })
            .collect();
        Self {
            task_id: task.id.clone(),
            handles,
        }
    }

    /// The task this pool serves.
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Number of workers in the pool.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        join_all(self.handles).await;
    }

    /// Abort all workers at their next await point. Blocking process
    /// function invocations already in flight are detached, not killed.
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("task_id", &self.task_id)
            .field("size", &self.handles.len())
            .finish()
    }
}

/// Claim, execute, report, until the task is drained or the dispatcher
/// goes away.
async fn worker_loop(
    worker_id: WorkerId,
    task_id: TaskId,
    processor: Arc<dyn BlockProcessor>,
    tx: mpsc::Sender<WorkerMessage>,
) {
    loop {
        let (reply_tx, reply_rx) = oneshot::channel();
        let claim = WorkerMessage::Claim {
            task_id: task_id.clone(),
            worker_id,
            reply: reply_tx,
        };
        if tx.send(claim).await.is_err() {
            break;
        }

        let block = match reply_rx.await {
            Ok(ClaimReply::Assigned(block)) => block,
            Ok(ClaimReply::Drained) | Err(_) => break,
        };

        let started = WorkerMessage::Started {
            task_id: task_id.clone(),
            block_id: block.id,
            worker_id,
        };
        if tx.send(started).await.is_err() {
            break;
        }

        let block_id = block.id;
        let outcome = execute(Arc::clone(&processor), block).await;

        let release = WorkerMessage::Release {
            task_id: task_id.clone(),
            block_id,
            worker_id,
            outcome,
        };
        if tx.send(release).await.is_err() {
            break;
        }
    }
}

/// Run precheck and process function on the blocking thread pool.
///
/// A panicking process function is contained and reported as a fault.
async fn execute(processor: Arc<dyn BlockProcessor>, block: Block) -> BlockOutcome {
    let result = tokio::task::spawn_blocking(move || {
        if processor.check(&block) {
            return BlockOutcome::Skipped;
        }
        match processor.process(&block) {
            Ok(()) => BlockOutcome::Success,
            Err(fault) => BlockOutcome::Failed(fault),
        }
    })
    .await;

    result.unwrap_or_else(|join_error| {
        BlockOutcome::Failed(BlockFault::new(format!(
            "process function panicked: {}",
            join_error
        )))
    })
}
