//! Task and run configuration.
//!
//! `TaskConfig` is the explicit per-task knob set enumerated at task
//! creation time; `RunConfig` lets an outer harness keep those knobs in a
//! TOML file keyed by task name; `RunOptions` carries the run-level
//! switches (cancellation token, hard-cancel mode, channel capacity).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::report::ProgressReporter;
use crate::Result;

/// Per-task scheduling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Number of dedicated workers for this task.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// How many times a faulted block is re-queued before its failure
    /// becomes terminal. Zero means at-most-one-attempt.
    #[serde(default)]
    pub retry_budget: u32,
}

fn default_num_workers() -> usize {
    1
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            retry_budget: 0,
        }
    }
}

/// A TOML-backed set of task configurations with a shared default.
///
/// ```toml
/// [default]
/// num_workers = 4
///
/// [tasks.blur]
/// num_workers = 8
/// retry_budget = 2
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Fallback for tasks without an explicit entry.
    #[serde(default)]
    pub default: TaskConfig,
    /// Per-task overrides, keyed by task name.
    #[serde(default)]
    pub tasks: HashMap<String, TaskConfig>,
}

impl RunConfig {
    /// Load a run configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        Ok(config)
    }

    /// Save the configuration back to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// The configuration for a task, falling back to the default.
    pub fn for_task(&self, name: &str) -> TaskConfig {
        self.tasks.get(name).cloned().unwrap_or_else(|| self.default.clone())
    }
}

/// Run-level options for [`crate::run_with`].
#[derive(Clone)]
pub struct RunOptions {
    /// External stop signal. Cancelling it transitions all not-yet-running
    /// blocks to the cancelled state.
    pub cancel: CancellationToken,
    /// When cancelled, do not wait for in-flight blocks to finish; they
    /// are counted as cancelled and their worker threads detached.
    pub hard_cancel: bool,
    /// Capacity of the dispatcher's message and event channels.
    pub channel_capacity: usize,
    /// Consumer for scheduler events. Defaults to the tracing-based
    /// [`crate::report::LogReporter`].
    pub reporter: Option<Arc<dyn ProgressReporter>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            hard_cancel: false,
            channel_capacity: 256,
            reporter: None,
        }
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("hard_cancel", &self.hard_cancel)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}
