//! DAG-based workflow representation using petgraph.
//!
//! Provides the core workflow data structure: task storage, dependency
//! edges, cycle detection, and the layer decomposition the scheduler
//! dispatches from.

use crate::workflow::task::{Task, TaskId};
use petgraph::algo::toposort as petgraph_toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Error types for workflow graph operations.
#[derive(Error, Debug, Clone)]
pub enum WorkflowError {
    /// Cycle detected in the dependency graph. Fatal: the listed tasks can
    /// never become runnable.
    #[error("circular dependency involving tasks: {0:?}")]
    CircularDependency(Vec<TaskId>),

    /// Referenced task not found in workflow
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// A task's `depends_on` names a task that was never added to the DAG
    #[error("task {task} depends on missing task {missing}")]
    MissingDependency { task: TaskId, missing: TaskId },
}

/// Node data stored in the workflow graph.
#[derive(Clone)]
pub(in crate::workflow) struct TaskNode {
    pub(in crate::workflow) task: Task,
}

impl TaskNode {
    pub(in crate::workflow) fn id(&self) -> &TaskId {
        &self.task.id
    }
}

/// Directed acyclic graph (DAG) representing a workflow's tasks and their
/// dependency edges. Nodes carry the declarative [`Task`]; edges point from
/// a dependency to its dependent, validated acyclic on every insertion.
///
/// # Example
///
/// ```ignore
/// let dag = Dag::from_tasks(vec![
///     Task::new("a", "fetch"),
///     Task::new("b", "transform").depends_on("a"),
/// ])?;
/// let layers = dag.execution_layers()?;
/// ```
pub struct Dag {
    pub(in crate::workflow) graph: DiGraph<TaskNode, ()>,
    pub(in crate::workflow) task_map: HashMap<TaskId, NodeIndex>,
}

impl Dag {
    /// Creates a new empty DAG.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_map: HashMap::new(),
        }
    }

    /// Builds a DAG from a flat list of tasks, wiring `depends_on` edges.
    /// Insertion order is preserved and used as the deterministic tie-break
    /// for [`execution_layers`](Self::execution_layers).
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self, WorkflowError> {
        let mut dag = Self::new();
        for task in &tasks {
            dag.add_task(task.clone());
        }
        for task in &tasks {
            for dep in &task.depends_on {
                if !dag.contains_task(dep) {
                    return Err(WorkflowError::MissingDependency {
                        task: task.id.clone(),
                        missing: dep.clone(),
                    });
                }
                dag.add_dependency(dep.clone(), task.id.clone())?;
            }
        }
        Ok(dag)
    }

    /// Adds a task to the DAG as an isolated node. Dependency edges from its
    /// `depends_on` field must be wired separately with
    /// [`add_dependency`](Self::add_dependency) (this is what
    /// [`from_tasks`](Self::from_tasks) does for you).
    pub fn add_task(&mut self, task: Task) -> NodeIndex {
        let id = task.id.clone();
        let idx = self.graph.add_node(TaskNode { task });
        self.task_map.insert(id, idx);
        idx
    }

    /// Adds a dependency edge: `from_task` must execute before `to_task`.
    ///
    /// The edge is added optimistically, then a topological sort verifies
    /// the graph is still acyclic; on failure the edge is rolled back and a
    /// concrete cycle path is reported.
    pub fn add_dependency(
        &mut self,
        from_task: impl Into<TaskId>,
        to_task: impl Into<TaskId>,
    ) -> Result<(), WorkflowError> {
        let from = from_task.into();
        let to = to_task.into();

        let from_idx = *self
            .task_map
            .get(&from)
            .ok_or_else(|| WorkflowError::TaskNotFound(from.clone()))?;
        let to_idx = *self
            .task_map
            .get(&to)
            .ok_or_else(|| WorkflowError::TaskNotFound(to.clone()))?;

        self.graph.add_edge(from_idx, to_idx, ());

        match petgraph_toposort(&self.graph, None) {
            Ok(_) => Ok(()),
            Err(_) => {
                self.graph.remove_edge(
                    self.graph
                        .find_edge(from_idx, to_idx)
                        .expect("edge just added"),
                );
                let cycle_path = self.find_cycle_path(from_idx, to_idx);
                Err(WorkflowError::CircularDependency(cycle_path))
            }
        }
    }

    /// Returns tasks in a single flat topological order (Kahn's algorithm
    /// via petgraph). Callers that need layer-parallel batches should use
    /// [`execution_layers`](Self::execution_layers) instead.
    pub fn execution_order(&self) -> Result<Vec<TaskId>, WorkflowError> {
        let sorted_indices = petgraph_toposort(&self.graph, None)
            .map_err(|_| WorkflowError::CircularDependency(self.detect_cycle_nodes()))?;

        Ok(sorted_indices
            .into_iter()
            .filter_map(|idx| self.graph.node_weight(idx))
            .map(|node| node.id().clone())
            .collect())
    }

    /// Decomposes the DAG into execution layers: layer N contains every
    /// task whose dependencies all lie in layers `0..N`. Tasks within a
    /// layer carry no ordering constraint against each other and may be
    /// dispatched concurrently.
    ///
    /// An empty DAG yields zero layers. A DAG with a dependency cycle
    /// returns `Err(WorkflowError::CircularDependency)` naming every task
    /// that never became reachable.
    ///
    /// Ties within a layer are broken by insertion order, making the result
    /// deterministic across runs for a given task list.
    pub fn execution_layers(&self) -> Result<Vec<Vec<TaskId>>, WorkflowError> {
        let mut completed: HashSet<NodeIndex> = HashSet::new();
        let mut remaining: HashSet<NodeIndex> = self.graph.node_indices().collect();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let mut candidates: Vec<NodeIndex> = remaining
                .iter()
                .copied()
                .filter(|&idx| {
                    self.graph
                        .neighbors_directed(idx, petgraph::Direction::Incoming)
                        .all(|dep| completed.contains(&dep))
                })
                .collect();

            if candidates.is_empty() {
                let mut stuck: Vec<NodeIndex> = remaining.into_iter().collect();
                stuck.sort();
                return Err(WorkflowError::CircularDependency(
                    stuck
                        .into_iter()
                        .filter_map(|idx| self.graph.node_weight(idx))
                        .map(|node| node.id().clone())
                        .collect(),
                ));
            }

            candidates.sort();
            let layer: Vec<TaskId> = candidates
                .iter()
                .filter_map(|idx| self.graph.node_weight(*idx))
                .map(|node| node.id().clone())
                .collect();

            for idx in &candidates {
                remaining.remove(idx);
                completed.insert(*idx);
            }
            layers.push(layer);
        }

        Ok(layers)
    }

    /// Returns tasks that are ready to execute (in-degree = 0).
    pub(in crate::workflow) fn ready_tasks(&self) -> Vec<&TaskNode> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .count()
                    == 0
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Returns all task IDs in the workflow.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.task_map.keys().cloned().collect()
    }

    /// Returns the number of tasks in the workflow.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Checks if a task ID exists in the workflow.
    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_map.contains_key(id)
    }

    /// Returns the declared `depends_on` of a task.
    pub fn task_dependencies(&self, id: &TaskId) -> Option<Vec<TaskId>> {
        self.task_map
            .get(id)
            .and_then(|&idx| self.graph.node_weight(idx))
            .map(|node| node.task.depends_on.clone())
    }

    /// Returns the full task definition for an id.
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.task_map
            .get(id)
            .and_then(|&idx| self.graph.node_weight(idx))
            .map(|node| &node.task)
    }

    /// Finds a concrete cycle path for error reporting via BFS from the
    /// edge that introduced it back to its source.
    fn find_cycle_path(&self, start: NodeIndex, end: NodeIndex) -> Vec<TaskId> {
        let mut visited = HashSet::new();
        let mut queue = vec![(end, vec![end])];

        while let Some((current, path)) = queue.pop() {
            if current == start {
                return path
                    .iter()
                    .filter_map(|&idx| self.graph.node_weight(idx).map(|node| node.id().clone()))
                    .collect();
            }

            if visited.contains(&current) {
                continue;
            }
            visited.insert(current);

            for neighbor in self
                .graph
                .neighbors_directed(current, petgraph::Direction::Incoming)
            {
                if !visited.contains(&neighbor) {
                    let mut new_path = path.clone();
                    new_path.push(neighbor);
                    queue.push((neighbor, new_path));
                }
            }
        }

        vec![
            self.graph[start].id().clone(),
            self.graph[end].id().clone(),
        ]
    }

    /// Detects all nodes involved in cycles (fallback error reporting for
    /// `execution_order`, via strongly connected components).
    fn detect_cycle_nodes(&self) -> Vec<TaskId> {
        let sccs = petgraph::algo::tarjan_scc(&self.graph);

        sccs.into_iter()
            .filter(|scc| scc.len() > 1)
            .flat_map(|scc| {
                scc.into_iter()
                    .filter_map(|idx| self.graph.node_weight(idx))
                    .map(|node| node.id().clone())
            })
            .collect()
    }
}

impl Default for Dag {
    fn default() -> Self {
        Self::new()
    }
}
