//! Workflow validation before execution.
//!
//! Provides comprehensive validation of workflow structure, detecting
//! cycles, missing dependencies, and orphan tasks before execution begins.
//! This is independent of [`crate::workflow::deadlock`], which looks for
//! runtime deadlock risk (resource contention, long chains) rather than
//! structural correctness of the DAG itself.

use crate::workflow::dag::{Dag, WorkflowError};
use crate::workflow::task::TaskId;
use petgraph::algo::is_cyclic_directed;
use std::collections::HashSet;

/// Validation report for workflow structure.
#[derive(Clone, Debug)]
pub struct ValidationReport {
    is_valid: bool,
    cycles: Vec<Vec<TaskId>>,
    missing_dependencies: Vec<TaskId>,
    orphan_tasks: Vec<TaskId>,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            is_valid: true,
            cycles: Vec::new(),
            missing_dependencies: Vec::new(),
            orphan_tasks: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn cycles(&self) -> &[Vec<TaskId>] {
        &self.cycles
    }

    pub fn missing_dependencies(&self) -> &[TaskId] {
        &self.missing_dependencies
    }

    pub fn orphan_tasks(&self) -> &[TaskId] {
        &self.orphan_tasks
    }

    fn mark_invalid(&mut self) {
        self.is_valid = false;
    }

    fn add_cycle(&mut self, cycle: Vec<TaskId>) {
        self.mark_invalid();
        self.cycles.push(cycle);
    }

    fn add_missing_dependency(&mut self, dep: TaskId) {
        self.mark_invalid();
        self.missing_dependencies.push(dep);
    }

    fn add_orphan_task(&mut self, task: TaskId) {
        // Orphan tasks are warnings, not errors - don't mark invalid.
        self.orphan_tasks.push(task);
    }
}

/// Workflow validator for structure verification.
///
/// `Dag::from_tasks`/`add_dependency` already reject cycles and missing
/// dependencies at construction time, so by the time a [`Dag`] exists those
/// conditions can only arise from a caller bypassing those constructors
/// (tests do this deliberately). `validate` re-derives them independently so
/// a `Dag` assembled any other way is still checked before it's handed to
/// the scheduler.
pub struct WorkflowValidator;

impl WorkflowValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validates the workflow structure. Checks for cycles, dangling
    /// `depends_on` references, and orphan tasks (disconnected from the
    /// main graph — a warning, not a validity failure).
    pub fn validate(&self, dag: &Dag) -> Result<ValidationReport, WorkflowError> {
        let mut report = ValidationReport::new();

        self.check_cycles(dag, &mut report);
        self.check_missing_dependencies(dag, &mut report);
        self.check_orphan_tasks(dag, &mut report);

        Ok(report)
    }

    fn check_cycles(&self, dag: &Dag, report: &mut ValidationReport) {
        if !is_cyclic_directed(&dag.graph) {
            return;
        }

        let sccs = petgraph::algo::tarjan_scc(&dag.graph);
        for scc in sccs {
            if scc.len() > 1 {
                let cycle_ids: Vec<TaskId> = scc
                    .iter()
                    .filter_map(|&idx| dag.graph.node_weight(idx))
                    .map(|node| node.id().clone())
                    .collect();
                if !cycle_ids.is_empty() {
                    report.add_cycle(cycle_ids);
                }
            }
        }
    }

    fn check_missing_dependencies(&self, dag: &Dag, report: &mut ValidationReport) {
        for task_id in dag.task_ids() {
            if let Some(deps) = dag.task_dependencies(&task_id) {
                for dep_id in deps {
                    if !dag.contains_task(&dep_id) {
                        report.add_missing_dependency(dep_id);
                    }
                }
            }
        }
    }

    fn check_orphan_tasks(&self, dag: &Dag, report: &mut ValidationReport) {
        let mut has_incoming: HashSet<TaskId> = HashSet::new();
        let mut has_outgoing: HashSet<TaskId> = HashSet::new();

        for task_id in dag.task_ids() {
            if let Some(&idx) = dag.task_map.get(&task_id) {
                let incoming = dag
                    .graph
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .count();
                if incoming > 0 {
                    has_incoming.insert(task_id.clone());
                }

                let outgoing = dag
                    .graph
                    .neighbors_directed(idx, petgraph::Direction::Outgoing)
                    .count();
                if outgoing > 0 {
                    has_outgoing.insert(task_id);
                }
            }
        }

        for task_id in dag.task_ids() {
            if !has_incoming.contains(&task_id) && !has_outgoing.contains(&task_id) {
                report.add_orphan_task(task_id);
            }
        }
    }
}

impl Default for WorkflowValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::task::Task;

    fn task(id: &str) -> Task {
        Task::new(id, "noop")
    }

    #[test]
    fn validates_a_clean_dag() {
        let dag = Dag::from_tasks(vec![task("a"), task("b").depends_on("a"), task("c").depends_on("a")]).unwrap();

        let report = WorkflowValidator::new().validate(&dag).unwrap();

        assert!(report.is_valid());
        assert_eq!(report.cycles().len(), 0);
        assert_eq!(report.missing_dependencies().len(), 0);
    }

    #[test]
    fn detects_cycles_in_a_graph_assembled_outside_add_dependency() {
        let mut dag = Dag::new();
        dag.add_task(task("a"));
        dag.add_task(task("b"));
        let a = dag.task_map[&TaskId::new("a")];
        let b = dag.task_map[&TaskId::new("b")];
        dag.graph.add_edge(a, b, ());
        dag.graph.add_edge(b, a, ());

        let report = WorkflowValidator::new().validate(&dag).unwrap();

        assert!(!report.is_valid());
        assert_eq!(report.cycles().len(), 1);
    }

    #[test]
    fn detects_missing_dependencies_declared_without_the_task_existing() {
        // Dag::from_tasks would itself reject this; build the inconsistency
        // directly to exercise the validator's independent check.
        let mut dag = Dag::new();
        dag.add_task(task("a").depends_on("nonexistent"));

        let report = WorkflowValidator::new().validate(&dag).unwrap();

        assert!(!report.is_valid());
        assert!(report.missing_dependencies().contains(&TaskId::new("nonexistent")));
    }

    #[test]
    fn detects_orphan_tasks() {
        let dag = Dag::from_tasks(vec![task("orphan"), task("a"), task("b").depends_on("a")]).unwrap();

        let report = WorkflowValidator::new().validate(&dag).unwrap();

        assert!(report.orphan_tasks().iter().any(|id| id == &TaskId::new("orphan")));
        assert!(!report.orphan_tasks().iter().any(|id| id == &TaskId::new("a")));
    }

    #[test]
    fn empty_dag_is_valid_with_no_orphans() {
        let dag = Dag::new();
        let report = WorkflowValidator::new().validate(&dag).unwrap();
        assert!(report.is_valid());
        assert!(report.orphan_tasks().is_empty());
    }
}
