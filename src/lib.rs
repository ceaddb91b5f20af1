//! Blockwise task scheduling over N-dimensional regions.
//!
//! Callers describe tasks: a total region of interest, a write-block
//! shape, an optional read context (halo), a process function, a worker
//! count, and upstream dependencies. The crate partitions each task into
//! blocks, resolves block-level dependencies across tasks, dispatches
//! ready blocks to per-task worker pools under a single-writer
//! dispatcher, and returns per-task execution summaries.
//!
//! ```ignore
//! use blockwise::{run, Roi, Task, TaskConfig};
//!
//! let blur = Task::new("blur", Roi::new(vec![0], vec![4_096_000])?, vec![16_384], process_fn)
//!     .with_config(TaskConfig { num_workers: 8, retry_budget: 1 });
//! let report = run(vec![blur]).await?;
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod report;
pub mod scheduling;

pub use crate::config::{RunConfig, RunOptions, TaskConfig};
pub use crate::core::block::{Block, BlockId, BlockStatus};
pub use crate::core::roi::Roi;
pub use crate::core::task::{BlockProcessor, Task, TaskId};
pub use crate::error::{BlockFault, Error, Result};
pub use crate::report::{
    ExecutionSummary, LogReporter, ProgressReporter, RunReport, SchedulerEvent,
};
pub use crate::scheduling::dispatcher::{run, run_blocking, run_with};
pub use crate::scheduling::pool::WorkerId;
pub use crate::scheduling::scheduler::{BlockOutcome, Scheduler, TaskState};
