//! Task dependency graph.
//!
//! Tasks form a DAG keyed by their upstream references. The graph
//! validates task names and acyclicity before any block executes, and
//! resolves block-level dependencies by grid arithmetic: a downstream
//! block depends on exactly the upstream blocks whose write ROI
//! intersects its read ROI.

use crate::core::block::{Block, BlockId};
use crate::core::partition::Grid;
use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// The validated task dependency graph.
///
/// Uses petgraph's DiGraph with tasks as nodes and upstream-to-downstream
/// edges. Construction fails fast on duplicate ids, unknown upstream
/// references, invalid block geometry, and cycles.
pub struct TaskGraph {
    graph: DiGraph<Task, ()>,
    index: HashMap<TaskId, NodeIndex>,
    grids: HashMap<TaskId, Grid>,
    topo_order: Vec<TaskId>,
}

impl TaskGraph {
    /// Build and validate the graph from a set of tasks.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateTask`] if two tasks share an id
    /// - [`Error::UnknownTask`] if an upstream reference names no task
    /// - [`Error::Partition`] if a task's block geometry is invalid
    /// - [`Error::CyclicDependency`] if the graph contains a cycle
    pub fn new(tasks: Vec<Task>) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut grids = HashMap::new();

        for task in tasks {
            if index.contains_key(&task.id) {
                return Err(Error::DuplicateTask(task.id));
            }
            let grid = Grid::new(&task.total_roi, &task.write_shape)?;
            grids.insert(task.id.clone(), grid);
            let id = task.id.clone();
            let node = graph.add_node(task);
            index.insert(id, node);
        }

        for node in graph.node_indices().collect::<Vec<_>>() {
            let upstream = graph[node].upstream.clone();
            for up in upstream {
                let up_node = *index.get(&up).ok_or(Error::UnknownTask(up))?;
                // Duplicate depends_on() calls collapse to one edge so
                // dependency counts stay exact.
                if graph.find_edge(up_node, node).is_none() {
                    graph.add_edge(up_node, node, ());
                }
            }
        }

        let topo_order = toposort(&graph, None)
            .map_err(|cycle| Error::CyclicDependency {
                task: graph[cycle.node_id()].id.clone(),
            })?
            .into_iter()
            .map(|node| graph[node].id.clone())
            .collect();

        Ok(Self {
            graph,
            index,
            grids,
            topo_order,
        })
    }

    /// Get a task by id.
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.index.get(id).map(|&node| &self.graph[node])
    }

    /// All tasks, in insertion order of the underlying graph.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.graph.node_weights()
    }

    /// Number of tasks.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Check whether the graph contains a task.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    /// The write-block grid of a task.
    pub fn grid(&self, id: &TaskId) -> Option<&Grid> {
        self.grids.get(id)
    }

    /// Number of blocks a task partitions into.
    pub fn num_blocks(&self, id: &TaskId) -> u64 {
        self.grids.get(id).map(|g| g.num_blocks()).unwrap_or(0)
    }

    /// Task ids in topological order (each task after its upstreams).
    pub fn topological_order(&self) -> &[TaskId] {
        &self.topo_order
    }

    /// True if the task has no upstream dependencies.
    pub fn is_root(&self, id: &TaskId) -> bool {
        self.index
            .get(id)
            .map(|&node| {
                self.graph
                    .neighbors_directed(node, petgraph::Direction::Incoming)
                    .next()
                    .is_none()
            })
            .unwrap_or(false)
    }

    /// Upstream task ids of a task.
    pub fn upstream_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, petgraph::Direction::Incoming)
    }

    /// Downstream task ids of a task.
    pub fn downstream_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, petgraph::Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, dir: petgraph::Direction) -> Vec<TaskId> {
        self.index
            .get(id)
            .map(|&node| {
                self.graph
                    .neighbors_directed(node, dir)
                    .map(|n| self.graph[n].id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The upstream blocks this block depends on.
    ///
    /// For each upstream task, these are the blocks whose write ROI
    /// intersects this block's read ROI. The downstream block may only
    /// become ready once all of them have succeeded or been skipped.
    pub fn upstream_blocks(&self, block: &Block) -> Vec<(TaskId, BlockId)> {
        let mut deps = Vec::new();
        for up in self.upstream_of(&block.task_id) {
            if let Some(grid) = self.grids.get(&up) {
                for id in grid.intersecting(&block.read_roi) {
                    deps.push((up.clone(), id));
                }
            }
        }
        deps
    }

    /// The downstream blocks that depend on this block.
    ///
    /// For each downstream task, these are the blocks whose read ROI
    /// intersects this block's write ROI. A downstream block reads its
    /// write ROI grown by its task's context, so the query grows this
    /// block's write ROI by the same margin before scanning the grid.
    pub fn downstream_blocks(&self, block: &Block) -> Vec<(TaskId, BlockId)> {
        let mut deps = Vec::new();
        for down in self.downstream_of(&block.task_id) {
            let (grid, context) = match (self.grids.get(&down), self.task(&down)) {
                (Some(grid), Some(task)) => (grid, &task.context),
                _ => continue,
            };
            let query = block.write_roi.grow(context);
            for id in grid.intersecting(&query) {
                deps.push((down.clone(), id));
            }
        }
        deps
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.task_count())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}
