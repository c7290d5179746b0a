//! A controlled DAG workflow execution core: a layer-parallel scheduler, a
//! reducer-based state store, a non-blocking multi-subscriber event stream,
//! and the ambient stack (checkpointing, speculation, rate limiting,
//! timeouts, cancellation, deadlock detection) it runs on top of.

pub mod audit;
pub mod workflow;

use thiserror::Error;

/// Crate-boundary union of every fatal error kind the workflow core can
/// raise, so a host can match on one type without reaching into individual
/// module errors. Recoverable, per-task failures stay inside `TaskResult`
/// and never reach this enum; see [`workflow::TaskError`].
#[derive(Error, Debug)]
pub enum DagforgeError {
    #[error("workflow graph error: {0}")]
    Graph(#[from] workflow::WorkflowError),

    #[error("workflow execution error: {0}")]
    Execution(#[from] workflow::WorkflowExecutionError),

    #[error(transparent)]
    Timeout(#[from] workflow::TimeoutError),

    #[error(transparent)]
    Deadlock(#[from] workflow::DeadlockError),

    #[error("state invariant violated: {0}")]
    State(#[from] workflow::StateInvariantViolation),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] workflow::CheckpointError),

    #[error("command rejected: {0}")]
    Command(#[from] workflow::CommandError),

    #[error("argument resolution error: {0}")]
    Argument(#[from] workflow::ArgumentError),

    #[error("configuration error: {0}")]
    Config(#[from] workflow::ConfigError),

    #[error("workflow definition error: {0}")]
    YamlWorkflow(#[from] workflow::YamlWorkflowError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{StateInvariantViolation, WorkflowState};

    #[test]
    fn narrower_errors_convert_into_the_crate_boundary_type() {
        let violation = WorkflowState::new("").unwrap_err();
        assert!(matches!(violation, StateInvariantViolation::EmptyWorkflowId));
        let err: DagforgeError = violation.into();
        assert!(matches!(err, DagforgeError::State(_)));
    }
}
