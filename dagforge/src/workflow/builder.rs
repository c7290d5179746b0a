//! Fluent builder API for workflow construction.
//!
//! Provides a convenient, chainable way to assemble a [`Dag`] from a
//! sequence of tasks and dependency edges without hand-managing insertion
//! order.
//!
//! # Example
//!
//! ```ignore
//! use dagforge::workflow::{Task, WorkflowBuilder};
//!
//! let dag = WorkflowBuilder::new()
//!     .add_task(Task::new("a", "fetch"))
//!     .add_task(Task::new("b", "transform"))
//!     .dependency("a", "b")
//!     .build()
//!     .unwrap();
//! ```

use crate::workflow::dag::{Dag, WorkflowError};
use crate::workflow::task::{Task, TaskId};

/// Fluent builder for constructing a [`Dag`].
#[derive(Default)]
pub struct WorkflowBuilder {
    tasks: Vec<Task>,
    dependencies: Vec<(TaskId, TaskId)>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task. If it already declares `depends_on` edges, those are
    /// honored alongside any `dependency()` calls made separately.
    pub fn add_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Declares an additional dependency edge: `from` must complete before
    /// `to` runs.
    pub fn dependency(mut self, from: impl Into<TaskId>, to: impl Into<TaskId>) -> Self {
        self.dependencies.push((from.into(), to.into()));
        self
    }

    /// Builds the DAG, wiring both tasks' own `depends_on` declarations and
    /// any edges added via `dependency()`. Fails on a missing or circular
    /// dependency.
    pub fn build(self) -> Result<Dag, WorkflowError> {
        let mut dag = Dag::from_tasks(self.tasks)?;
        for (from, to) in self.dependencies {
            dag.add_dependency(from, to)?;
        }
        Ok(dag)
    }
}
