use thiserror::Error;

use crate::core::task::TaskId;
use crate::report::RunReport;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid ROI: {0}")]
    InvalidRoi(String),

    #[error("Partition error: {0}")]
    Partition(String),

    #[error("Cyclic dependency involving task '{task}'")]
    CyclicDependency { task: TaskId },

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Task already exists: {0}")]
    DuplicateTask(TaskId),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Run cancelled:\n{0}")]
    Cancelled(RunReport),

    #[error("Run finished with failures:\n{0}")]
    RunFailed(RunReport),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A fault raised by a process function while executing a block.
///
/// Faults are captured and recorded by the scheduler, retried up to the
/// task's retry budget, and never allowed to crash the dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("block execution fault: {message}")]
pub struct BlockFault {
    /// Human-readable description of what went wrong.
    pub message: String,
}

impl BlockFault {
    /// Create a fault with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for BlockFault {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for BlockFault {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}
