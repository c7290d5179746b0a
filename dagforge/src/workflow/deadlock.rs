//! Deadlock detection and prevention for workflow execution.
//!
//! This module provides deadlock detection for parallel workflow execution:
//! - Dependency cycle detection (before execution)
//! - Resource deadlock analysis (heuristic-based warnings)
//! - Timeout-based abort (runtime deadlock prevention)

use crate::workflow::dag::{Dag, WorkflowError};
use crate::workflow::task::TaskId;
use petgraph::algo::tarjan_scc;
use thiserror::Error;

/// Error types for deadlock detection.
#[derive(Error, Debug)]
pub enum DeadlockError {
    /// Dependency cycle detected in workflow
    #[error("Dependency cycle detected: {0:?}")]
    DependencyCycle(Vec<TaskId>),

    /// Resource deadlock detected at runtime
    #[error("Resource deadlock detected: {0}")]
    ResourceDeadlock(String),

    /// Potential deadlock warning (heuristic-based)
    #[error("Potential deadlock: {0}")]
    PotentialDeadlock(String),
}

impl From<DeadlockError> for WorkflowError {
    fn from(err: DeadlockError) -> Self {
        match err {
            DeadlockError::DependencyCycle(cycle) => WorkflowError::CircularDependency(cycle),
            DeadlockError::ResourceDeadlock(_) | DeadlockError::PotentialDeadlock(_) => {
                WorkflowError::CircularDependency(Vec::new())
            }
        }
    }
}

/// Warning type for potential deadlock conditions.
#[derive(Clone, Debug)]
pub enum DeadlockWarningType {
    /// Tasks share the same resource (potential contention)
    SharedResource(String),
    /// Long chain of dependent tasks (risk of timeout)
    LongDependencyChain { length: usize },
    /// Task has no timeout configured (risk of hanging)
    NoTimeout,
}

/// A deadlock warning with context and suggestions.
#[derive(Clone, Debug)]
pub struct DeadlockWarning {
    /// Task ID that triggered the warning
    pub task_id: TaskId,
    /// Type of warning
    pub warning_type: DeadlockWarningType,
    /// Human-readable suggestion
    pub suggestion: String,
}

impl DeadlockWarning {
    fn new(task_id: TaskId, warning_type: DeadlockWarningType, suggestion: String) -> Self {
        Self {
            task_id,
            warning_type,
            suggestion,
        }
    }

    /// Returns a human-readable description of the warning.
    pub fn description(&self) -> String {
        match &self.warning_type {
            DeadlockWarningType::SharedResource(resource) => {
                format!("Task '{}' shares resource '{}': {}", self.task_id, resource, self.suggestion)
            }
            DeadlockWarningType::LongDependencyChain { length } => {
                format!(
                    "Task '{}' has a long dependency chain ({} layers): {}",
                    self.task_id, length, self.suggestion
                )
            }
            DeadlockWarningType::NoTimeout => {
                format!("Task '{}' has no timeout: {}", self.task_id, self.suggestion)
            }
        }
    }
}

/// Deadlock detector for workflow analysis.
///
/// Provides static analysis of workflow structure to detect:
/// - Dependency cycles (hard error - prevents execution)
/// - Resource deadlock patterns (warning - execution continues)
/// - Long dependency chains (warning - execution continues)
pub struct DeadlockDetector;

impl DeadlockDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detects dependency cycles in the workflow DAG using Tarjan's
    /// strongly connected components algorithm.
    pub fn detect_dependency_cycles(&self, dag: &Dag) -> Result<(), DeadlockError> {
        let sccs = tarjan_scc(&dag.graph);

        for scc in &sccs {
            if scc.len() > 1 {
                let cycle_tasks: Vec<TaskId> = scc
                    .iter()
                    .filter_map(|&idx| dag.graph.node_weight(idx))
                    .map(|node| node.id().clone())
                    .collect();

                if !cycle_tasks.is_empty() {
                    return Err(DeadlockError::DependencyCycle(cycle_tasks));
                }
            }
        }

        for scc in &sccs {
            if scc.len() == 1 {
                let idx = scc[0];
                if dag.graph.find_edge(idx, idx).is_some() {
                    if let Some(node) = dag.graph.node_weight(idx) {
                        return Err(DeadlockError::DependencyCycle(vec![node.id().clone()]));
                    }
                }
            }
        }

        Ok(())
    }

    /// Analyzes workflow for potential resource deadlocks.
    ///
    /// Heuristic only: execution is never blocked by what this returns.
    pub fn detect_resource_deadlocks(&self, dag: &Dag) -> Result<Vec<DeadlockWarning>, DeadlockError> {
        Ok(self.detect_long_chains(dag))
    }

    /// Warns about tasks in the deepest layer of a workflow whose execution
    /// layering runs more than five deep, since a long serial chain is the
    /// likeliest place a stuck dependency goes unnoticed.
    fn detect_long_chains(&self, dag: &Dag) -> Vec<DeadlockWarning> {
        let mut warnings = Vec::new();

        if let Ok(layers) = dag.execution_layers() {
            let depth = layers.len();
            if depth > 5 {
                if let Some(deepest) = layers.last() {
                    for task_id in deepest {
                        warnings.push(DeadlockWarning::new(
                            task_id.clone(),
                            DeadlockWarningType::LongDependencyChain { length: depth },
                            format!(
                                "Consider splitting this workflow or increasing the deadlock timeout (current depth: {})",
                                depth
                            ),
                        ));
                    }
                }
            }
        }

        warnings
    }

    /// Validates that a workflow is deadlock-free: hard-errors on cycles,
    /// otherwise returns whatever heuristic warnings were raised.
    pub fn validate_workflow(&self, dag: &Dag) -> Result<Vec<DeadlockWarning>, DeadlockError> {
        self.detect_dependency_cycles(dag)?;
        self.detect_resource_deadlocks(dag)
    }
}

impl Default for DeadlockDetector {
    fn default() -> Self {
        Self::new()
    }
}
