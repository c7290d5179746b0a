//! Command queue: the scheduler's inbound control surface.
//!
//! Commands are accepted asynchronously (enqueued from any caller) and
//! drained synchronously by the scheduler at layer boundaries, so a command
//! can never interrupt a task already in flight mid-layer. The two
//! `*_response` variants additionally resolve a decision point the scheduler
//! itself raised and is blocked on (AIL/HIL), so those are drained and
//! matched against pending decisions before an ordinary layer boundary.

use crate::workflow::argument::ArgumentValue;
use crate::workflow::state::DecisionOutcome;
use crate::workflow::task::{Task, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use thiserror::Error;

/// A control-plane instruction accepted by a running workflow.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// No-op acknowledgement that lets a paused or decision-blocked
    /// workflow proceed unchanged.
    Continue { workflow_id: String },

    /// Aborts the workflow outright.
    Abort { workflow_id: String, reason: String },

    /// Adds tasks to the DAG, to run no earlier than `target_layer`.
    InjectTasks {
        workflow_id: String,
        tasks: Vec<Task>,
        target_layer: usize,
    },

    /// Requests the DAG be rebuilt for a new requirement, given whatever
    /// context is available so far. The scheduler decides how (or whether)
    /// to honor this; it is advisory from the command queue's perspective.
    ReplanDag {
        workflow_id: String,
        new_requirement: String,
        available_context: HashMap<String, Value>,
    },

    /// Skips an entire not-yet-started layer.
    SkipLayer {
        workflow_id: String,
        layer_index: usize,
        reason: String,
    },

    /// Overrides one task's declared arguments before it resolves.
    ModifyArgs {
        workflow_id: String,
        task_id: TaskId,
        updates: HashMap<String, ArgumentValue>,
    },

    /// Resolves a pending AIL checkpoint decision.
    CheckpointResponse {
        workflow_id: String,
        checkpoint_id: String,
        decision: DecisionOutcome,
    },

    /// Resolves a pending HIL approval decision.
    ApprovalResponse {
        workflow_id: String,
        checkpoint_id: String,
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<String>,
    },
}

impl Command {
    pub fn workflow_id(&self) -> &str {
        match self {
            Command::Continue { workflow_id }
            | Command::Abort { workflow_id, .. }
            | Command::InjectTasks { workflow_id, .. }
            | Command::ReplanDag { workflow_id, .. }
            | Command::SkipLayer { workflow_id, .. }
            | Command::ModifyArgs { workflow_id, .. }
            | Command::CheckpointResponse { workflow_id, .. }
            | Command::ApprovalResponse { workflow_id, .. } => workflow_id,
        }
    }

    /// Whether this command resolves an outstanding decision point rather
    /// than an ordinary layer-boundary control instruction.
    pub fn is_decision_response(&self) -> bool {
        matches!(self, Command::CheckpointResponse { .. } | Command::ApprovalResponse { .. })
    }
}

/// Why a command was rejected rather than enqueued or applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command targets workflow '{expected}' but queue belongs to '{actual}'")]
    WrongWorkflow { expected: String, actual: String },

    #[error("invalid command: {0}")]
    Invalid(String),
}

/// FIFO queue of pending commands for one workflow run. Safe to enqueue
/// from any task (wrapped in a mutex); drained synchronously by the
/// scheduler between layers.
pub struct CommandQueue {
    workflow_id: String,
    queue: Mutex<VecDeque<Command>>,
    rejected: Mutex<Vec<(Command, CommandError)>>,
}

impl CommandQueue {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            queue: Mutex::new(VecDeque::new()),
            rejected: Mutex::new(Vec::new()),
        }
    }

    /// Accepts a command into the queue, or records it as rejected if it
    /// targets a different workflow.
    pub fn enqueue(&self, command: Command) -> Result<(), CommandError> {
        if command.workflow_id() != self.workflow_id {
            let err = CommandError::WrongWorkflow {
                expected: self.workflow_id.clone(),
                actual: command.workflow_id().to_string(),
            };
            self.rejected
                .lock()
                .expect("command queue lock poisoned")
                .push((command, err.clone()));
            return Err(err);
        }
        self.queue
            .lock()
            .expect("command queue lock poisoned")
            .push_back(command);
        Ok(())
    }

    /// Drains every currently-queued command in FIFO order. Called by the
    /// scheduler at a layer boundary; never blocks.
    pub fn drain(&self) -> Vec<Command> {
        let mut q = self.queue.lock().expect("command queue lock poisoned");
        q.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().expect("command queue lock poisoned").len()
    }

    pub fn rejected_commands(&self) -> Vec<(Command, CommandError)> {
        self.rejected.lock().expect("command queue lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_and_drain_preserves_fifo_order() {
        let q = CommandQueue::new("w1");
        q.enqueue(Command::Continue { workflow_id: "w1".into() }).unwrap();
        q.enqueue(Command::Abort { workflow_id: "w1".into(), reason: "x".into() })
            .unwrap();

        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], Command::Continue { .. }));
        assert!(matches!(drained[1], Command::Abort { .. }));
        assert_eq!(q.pending_count(), 0);
    }

    #[test]
    fn wrong_workflow_is_rejected_not_enqueued() {
        let q = CommandQueue::new("w1");
        let result = q.enqueue(Command::Continue { workflow_id: "w2".into() });
        assert!(matches!(result, Err(CommandError::WrongWorkflow { .. })));
        assert_eq!(q.pending_count(), 0);
        assert_eq!(q.rejected_commands().len(), 1);
    }

    #[test]
    fn drain_is_idempotent_empty_after() {
        let q = CommandQueue::new("w1");
        q.enqueue(Command::SkipLayer { workflow_id: "w1".into(), layer_index: 1, reason: "x".into() })
            .unwrap();
        assert_eq!(q.drain().len(), 1);
        assert_eq!(q.drain().len(), 0);
    }

    #[test]
    fn decision_responses_are_identified() {
        let approval = Command::ApprovalResponse {
            workflow_id: "w1".into(),
            checkpoint_id: "c1".into(),
            approved: true,
            feedback: None,
        };
        assert!(approval.is_decision_response());
        assert!(!Command::Continue { workflow_id: "w1".into() }.is_decision_response());
    }

    #[test]
    fn modify_args_targets_a_single_task() {
        let q = CommandQueue::new("w1");
        let mut updates = HashMap::new();
        updates.insert("x".to_string(), ArgumentValue::Literal { value: Value::from(1) });
        q.enqueue(Command::ModifyArgs {
            workflow_id: "w1".into(),
            task_id: TaskId::new("t1"),
            updates,
        })
        .unwrap();
        assert_eq!(q.pending_count(), 1);
    }
}
