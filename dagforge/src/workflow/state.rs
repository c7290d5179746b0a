//! State store: the authoritative record of a workflow run, its reducers,
//! and a derived, read-only projection for external inspection.
//!
//! [`WorkflowState`] is the only thing the Layer Scheduler writes to, and it
//! writes through the four reducers below rather than mutating fields
//! directly. [`WorkflowProgress`] is a snapshot computed from it on demand
//! for monitoring — never the source of truth for scheduling decisions.

use crate::workflow::dag::Dag;
use crate::workflow::task::{TaskId, TaskResult, TaskStatus as ResultStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// A violated invariant of [`WorkflowState`]. Reducers refuse to apply a
/// transition that would produce one of these rather than letting the state
/// drift into an inconsistent shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateInvariantViolation {
    #[error("workflow id must not be empty")]
    EmptyWorkflowId,

    #[error("tasks.len() ({tasks}) must be >= decisions.len() ({decisions})")]
    DecisionsOutpaceTasks { tasks: usize, decisions: usize },

    #[error("workflow id changed from '{original}' to '{attempted}'")]
    WorkflowIdChanged { original: String, attempted: String },
}

/// A single appended conversational entry (agent/tool/human commentary).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Which kind of decision point produced a [`Decision`] record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Agent-in-the-loop.
    Ail,
    /// Human-in-the-loop.
    Hil,
}

/// How a decision point was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Continue,
    Abort,
    Approve,
    Reject,
}

/// One resolved (or, transiently, pending) decision point.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "type")]
    pub kind: DecisionKind,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<DecisionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Decision {
    pub fn new(kind: DecisionKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            description: description.into(),
            outcome: None,
            confidence: None,
        }
    }

    pub fn with_outcome(mut self, outcome: DecisionOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// The authoritative record of one workflow run. Every field but
/// `workflow_id` is append-only or merge-only, and every mutation goes
/// through [`update_state`] rather than direct field access from outside
/// this module.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub current_layer: usize,
    pub messages: Vec<Message>,
    pub tasks: Vec<TaskResult>,
    pub decisions: Vec<Decision>,
    pub context: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_checkpoint_id: Option<String>,
}

impl WorkflowState {
    /// Creates a fresh state for `workflow_id` at layer 0 with empty
    /// sequences. Fails if `workflow_id` is empty, since that invariant must
    /// hold from the very first state the scheduler produces.
    pub fn new(workflow_id: impl Into<String>) -> Result<Self, StateInvariantViolation> {
        let workflow_id = workflow_id.into();
        if workflow_id.is_empty() {
            return Err(StateInvariantViolation::EmptyWorkflowId);
        }
        Ok(Self {
            workflow_id,
            current_layer: 0,
            messages: Vec::new(),
            tasks: Vec::new(),
            decisions: Vec::new(),
            context: HashMap::new(),
            latest_checkpoint_id: None,
        })
    }

    fn validate(&self) -> Result<(), StateInvariantViolation> {
        if self.workflow_id.is_empty() {
            return Err(StateInvariantViolation::EmptyWorkflowId);
        }
        if self.tasks.len() < self.decisions.len() {
            return Err(StateInvariantViolation::DecisionsOutpaceTasks {
                tasks: self.tasks.len(),
                decisions: self.decisions.len(),
            });
        }
        Ok(())
    }

    pub fn result_for(&self, task_id: &TaskId) -> Option<&TaskResult> {
        self.tasks.iter().rev().find(|r| &r.task_id == task_id)
    }

    pub fn is_success(&self, task_id: &TaskId) -> bool {
        self.result_for(task_id).map(|r| r.is_success()).unwrap_or(false)
    }

    pub fn is_complete(&self, task_id: &TaskId) -> bool {
        self.result_for(task_id).is_some()
    }
}

/// Pure reducer: appends a message to `existing`.
pub fn messages_reducer(existing: &[Message], update: Message) -> Vec<Message> {
    let mut next = existing.to_vec();
    next.push(update);
    next
}

/// Pure reducer: appends a task result to `existing`.
pub fn tasks_reducer(existing: &[TaskResult], update: TaskResult) -> Vec<TaskResult> {
    let mut next = existing.to_vec();
    next.push(update);
    next
}

/// Pure reducer: appends a decision to `existing`.
pub fn decisions_reducer(existing: &[Decision], update: Decision) -> Vec<Decision> {
    let mut next = existing.to_vec();
    next.push(update);
    next
}

/// Pure reducer: shallow-merges `update` into `existing`; `update` wins on
/// key conflict.
pub fn context_reducer(
    existing: &HashMap<String, Value>,
    update: HashMap<String, Value>,
) -> HashMap<String, Value> {
    let mut next = existing.clone();
    next.extend(update);
    next
}

/// A partial transition applied to [`WorkflowState`] by [`update_state`].
/// Every field is optional; only the reducers for fields actually present
/// run.
#[derive(Clone, Debug, Default)]
pub struct StateUpdate {
    pub message: Option<Message>,
    pub task: Option<TaskResult>,
    pub decision: Option<Decision>,
    pub context: Option<HashMap<String, Value>>,
    pub current_layer: Option<usize>,
    pub latest_checkpoint_id: Option<String>,
}

impl StateUpdate {
    pub fn with_task(task: TaskResult) -> Self {
        Self {
            task: Some(task),
            ..Default::default()
        }
    }

    pub fn with_decision(decision: Decision) -> Self {
        Self {
            decision: Some(decision),
            ..Default::default()
        }
    }

    pub fn with_layer(layer: usize) -> Self {
        Self {
            current_layer: Some(layer),
            ..Default::default()
        }
    }
}

/// Applies `update` to `state` via the four reducers, then revalidates
/// invariants. Never mutates `state`; returns a new value on success and
/// leaves the caller to decide what a rejected update means for the
/// workflow (the spec treats it as fatal).
pub fn update_state(
    state: &WorkflowState,
    update: StateUpdate,
) -> Result<WorkflowState, StateInvariantViolation> {
    let mut next = state.clone();

    if let Some(message) = update.message {
        next.messages = messages_reducer(&next.messages, message);
    }
    if let Some(task) = update.task {
        next.tasks = tasks_reducer(&next.tasks, task);
    }
    if let Some(decision) = update.decision {
        next.decisions = decisions_reducer(&next.decisions, decision);
    }
    if let Some(context) = update.context {
        next.context = context_reducer(&next.context, context);
    }
    if let Some(layer) = update.current_layer {
        next.current_layer = layer;
    }
    if let Some(checkpoint_id) = update.latest_checkpoint_id {
        next.latest_checkpoint_id = Some(checkpoint_id);
    }

    if next.workflow_id != state.workflow_id {
        return Err(StateInvariantViolation::WorkflowIdChanged {
            original: state.workflow_id.clone(),
            attempted: next.workflow_id,
        });
    }

    next.validate()?;
    Ok(next)
}

/// Returns an immutable deep view of `state` for event payloads and
/// checkpoint persistence. `WorkflowState` is already immutable-by-API, so
/// this is a clone; the named function documents the contract at call
/// sites.
pub fn get_state_snapshot(state: &WorkflowState) -> WorkflowState {
    state.clone()
}

/// Status of a workflow execution, as read externally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Status of an individual task, as read externally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskProjectionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Summary of a task's state for the read-side projection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: String,
    pub name: String,
    pub status: TaskProjectionStatus,
}

impl TaskSummary {
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: TaskProjectionStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status,
        }
    }
}

/// A read-only snapshot of a workflow's execution progress, derived from
/// [`WorkflowState`] plus the [`Dag`] it's running against. Never mutated in
/// place; call [`project`] again for a fresh view. This is additive
/// monitoring surface, not part of the reducer-owned authoritative state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub completed_tasks: Vec<TaskSummary>,
    pub running_tasks: Vec<TaskSummary>,
    pub pending_tasks: Vec<TaskSummary>,
    pub failed_tasks: Vec<TaskSummary>,
}

impl WorkflowProgress {
    pub fn progress(&self) -> f64 {
        let total = self.completed_tasks.len()
            + self.running_tasks.len()
            + self.pending_tasks.len()
            + self.failed_tasks.len();
        if total == 0 {
            0.0
        } else {
            self.completed_tasks.len() as f64 / total as f64
        }
    }
}

/// Derives a [`WorkflowProgress`] snapshot from the authoritative state and
/// the DAG it's running against. `running` lists tasks dispatched but not
/// yet present in `state.tasks`.
pub fn project(state: &WorkflowState, dag: &Dag, running: &[TaskId]) -> WorkflowProgress {
    let all_ids: std::collections::HashSet<TaskId> = dag.task_ids().into_iter().collect();

    let mut completed_tasks = Vec::new();
    let mut failed_tasks = Vec::new();
    let mut seen: std::collections::HashSet<TaskId> = std::collections::HashSet::new();
    for result in state.tasks.iter().rev() {
        if !seen.insert(result.task_id.clone()) {
            continue;
        }
        let name = dag.task(&result.task_id).map(|t| t.tool.clone()).unwrap_or_default();
        match result.status {
            ResultStatus::Success => {
                completed_tasks.push(TaskSummary::new(result.task_id.as_str(), name, TaskProjectionStatus::Completed))
            }
            ResultStatus::Error => {
                failed_tasks.push(TaskSummary::new(result.task_id.as_str(), name, TaskProjectionStatus::Failed))
            }
        }
    }

    let running_tasks: Vec<TaskSummary> = running
        .iter()
        .filter(|id| !seen.contains(*id))
        .map(|id| {
            let name = dag.task(id).map(|t| t.tool.clone()).unwrap_or_default();
            TaskSummary::new(id.as_str(), name, TaskProjectionStatus::Running)
        })
        .collect();

    let accounted: std::collections::HashSet<&TaskId> =
        seen.iter().chain(running.iter()).collect();
    let pending_tasks: Vec<TaskSummary> = all_ids
        .iter()
        .filter(|id| !accounted.contains(id))
        .map(|id| {
            let name = dag.task(id).map(|t| t.tool.clone()).unwrap_or_default();
            TaskSummary::new(id.as_str(), name, TaskProjectionStatus::Pending)
        })
        .collect();

    let status = if !failed_tasks.is_empty() {
        WorkflowStatus::Failed
    } else if completed_tasks.len() == all_ids.len() && !all_ids.is_empty() {
        WorkflowStatus::Completed
    } else if completed_tasks.is_empty() && running_tasks.is_empty() {
        WorkflowStatus::Pending
    } else {
        WorkflowStatus::Running
    };

    WorkflowProgress {
        workflow_id: state.workflow_id.clone(),
        status,
        completed_tasks,
        running_tasks,
        pending_tasks,
        failed_tasks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::task::Task;

    fn dag3() -> Dag {
        Dag::from_tasks(vec![Task::new("t1", "a"), Task::new("t2", "b"), Task::new("t3", "c")]).unwrap()
    }

    #[test]
    fn empty_workflow_id_is_rejected() {
        assert!(matches!(WorkflowState::new(""), Err(StateInvariantViolation::EmptyWorkflowId)));
    }

    #[test]
    fn tasks_reducer_appends() {
        let state = WorkflowState::new("w1").unwrap();
        let next = update_state(&state, StateUpdate::with_task(TaskResult::success(TaskId::new("t1"), Value::from(1), 5))).unwrap();
        assert_eq!(next.tasks.len(), 1);
        assert_eq!(state.tasks.len(), 0, "original state must be untouched");
    }

    #[test]
    fn decisions_cannot_outpace_tasks() {
        let state = WorkflowState::new("w1").unwrap();
        let update = StateUpdate::with_decision(Decision::new(DecisionKind::Ail, "check"));
        let result = update_state(&state, update);
        assert!(matches!(result, Err(StateInvariantViolation::DecisionsOutpaceTasks { tasks: 0, decisions: 1 })));
    }

    #[test]
    fn decision_after_task_is_accepted() {
        let state = WorkflowState::new("w1").unwrap();
        let state = update_state(&state, StateUpdate::with_task(TaskResult::success(TaskId::new("t1"), Value::from(1), 5))).unwrap();
        let state = update_state(&state, StateUpdate::with_decision(Decision::new(DecisionKind::Ail, "check"))).unwrap();
        assert_eq!(state.decisions.len(), 1);
    }

    #[test]
    fn context_reducer_update_wins_on_conflict() {
        let state = WorkflowState::new("w1").unwrap();
        let mut ctx1 = HashMap::new();
        ctx1.insert("a".to_string(), Value::from(1));
        let state = update_state(&state, StateUpdate { context: Some(ctx1), ..Default::default() }).unwrap();

        let mut ctx2 = HashMap::new();
        ctx2.insert("a".to_string(), Value::from(2));
        let state = update_state(&state, StateUpdate { context: Some(ctx2), ..Default::default() }).unwrap();
        assert_eq!(state.context.get("a"), Some(&Value::from(2)));
    }

    #[test]
    fn workflow_id_is_immutable_after_creation() {
        let mut state = WorkflowState::new("w1").unwrap();
        state.workflow_id = "w2".to_string();
        let result = update_state(&state, StateUpdate::default());
        assert!(matches!(result, Err(StateInvariantViolation::WorkflowIdChanged { .. })));
    }

    #[test]
    fn current_layer_updates_independently() {
        let state = WorkflowState::new("w1").unwrap();
        let state = update_state(&state, StateUpdate::with_layer(3)).unwrap();
        assert_eq!(state.current_layer, 3);
    }

    #[test]
    fn get_state_snapshot_is_a_deep_copy() {
        let state = WorkflowState::new("w1").unwrap();
        let state = update_state(&state, StateUpdate::with_task(TaskResult::success(TaskId::new("t1"), Value::from(1), 5))).unwrap();
        let snapshot = get_state_snapshot(&state);
        assert_eq!(snapshot.tasks.len(), state.tasks.len());
    }

    #[test]
    fn project_empty_state_is_pending() {
        let dag = dag3();
        let state = WorkflowState::new("w1").unwrap();
        let progress = project(&state, &dag, &[]);
        assert_eq!(progress.status, WorkflowStatus::Pending);
        assert_eq!(progress.pending_tasks.len(), 3);
    }

    #[test]
    fn project_reflects_running_and_completed() {
        let dag = dag3();
        let state = WorkflowState::new("w1").unwrap();
        let state = update_state(&state, StateUpdate::with_task(TaskResult::success(TaskId::new("t1"), Value::from(1), 5))).unwrap();
        let progress = project(&state, &dag, &[TaskId::new("t2")]);
        assert_eq!(progress.completed_tasks.len(), 1);
        assert_eq!(progress.running_tasks.len(), 1);
        assert_eq!(progress.pending_tasks.len(), 1);
        assert_eq!(progress.status, WorkflowStatus::Running);
    }

    #[test]
    fn project_any_failure_is_failed_status() {
        let dag = dag3();
        let state = WorkflowState::new("w1").unwrap();
        let state = update_state(&state, StateUpdate::with_task(TaskResult::error(TaskId::new("t1"), "x", true))).unwrap();
        assert_eq!(project(&state, &dag, &[]).status, WorkflowStatus::Failed);
    }

    #[test]
    fn project_all_complete_is_completed_status() {
        let dag = Dag::from_tasks(vec![Task::new("t1", "a")]).unwrap();
        let state = WorkflowState::new("w1").unwrap();
        let state = update_state(&state, StateUpdate::with_task(TaskResult::success(TaskId::new("t1"), Value::from(1), 1))).unwrap();
        assert_eq!(project(&state, &dag, &[]).status, WorkflowStatus::Completed);
    }

    #[test]
    fn project_progress_calculation() {
        let dag = dag3();
        let state = WorkflowState::new("w1").unwrap();
        let state = update_state(&state, StateUpdate::with_task(TaskResult::success(TaskId::new("t1"), Value::from(1), 1))).unwrap();
        assert!((project(&state, &dag, &[]).progress() - (1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn state_serialization_roundtrip() {
        let state = WorkflowState::new("w1").unwrap();
        let state = update_state(&state, StateUpdate::with_task(TaskResult::success(TaskId::new("t1"), Value::from(1), 1))).unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let back: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.workflow_id, "w1");
        assert_eq!(back.tasks.len(), 1);
    }
}
