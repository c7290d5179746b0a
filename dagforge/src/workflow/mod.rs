//! DAG workflow execution core: a layer-parallel scheduler over a task
//! graph, a reducer-based state store, a non-blocking event stream, and the
//! ambient stack (cancellation, timeouts, rate limiting, speculation,
//! deadlock detection, checkpointing) it runs on.

pub mod argument;
pub mod builder;
pub mod cancellation;
pub mod checkpoint;
pub mod command;
pub mod config;
pub mod dag;
pub mod deadlock;
pub mod event;
pub mod examples;
pub mod executor;
pub mod ratelimit;
pub mod speculation;
pub mod state;
pub mod task;
pub mod tasks;
pub mod timeout;
pub mod validate;
pub mod yaml;

pub use argument::{
    Accessor, ArgumentError, ArgumentValue, ExecutionContext, Expression, Path, TemplatePart,
    merge_arguments, resolve, validate_required_arguments,
};
pub use builder::WorkflowBuilder;
pub use cancellation::{CancellationToken, CancellationTokenSource, ChildToken};
pub use checkpoint::{
    CHECKPOINT_VERSION, CheckpointError, CheckpointStorage, DEFAULT_RETENTION,
    InMemoryCheckpointStore, WorkflowCheckpoint,
};
pub use command::{Command, CommandError, CommandQueue};
pub use config::{
    AdaptiveConfig, AilConfig, AilMode, ConfigError, ExecutorConfig, HilConfig, HilMode,
    HostContext, MaxConcurrency, SpeculationConfig,
};
pub use dag::{Dag, WorkflowError};
pub use deadlock::{DeadlockDetector, DeadlockError, DeadlockWarning, DeadlockWarningType};
pub use event::{EventSink, EventStream, EventStreamStats, ExecutionEvent, NullSink, StampedEvent};
pub use executor::{WorkflowExecutionError, WorkflowExecutionResult, WorkflowExecutor};
pub use ratelimit::{RateLimitConfig, RateLimiter};
pub use speculation::{
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_SPECULATION_TTL, NullOutcomeSink, SpeculationCache,
    SpeculationOutcomeSink,
};
pub use state::{
    Decision, DecisionKind, DecisionOutcome, Message, StateInvariantViolation, StateUpdate,
    TaskProjectionStatus, TaskSummary, WorkflowProgress, WorkflowState, WorkflowStatus,
    context_reducer, decisions_reducer, get_state_snapshot, messages_reducer, project,
    tasks_reducer, update_state,
};
pub use task::{
    Dependency, Task, TaskError, TaskExecutionContext, TaskExecutor, TaskId, TaskKind, TaskResult,
    TaskStatus,
};
pub use tasks::{FunctionExecutor, ShellExecutor};
pub use timeout::{TaskTimeout, TimeoutConfig, TimeoutError, WorkflowTimeout};
pub use validate::{ValidationReport, WorkflowValidator};
pub use yaml::{
    YamlTask, YamlWorkflow, YamlWorkflowError, load_workflow_from_file, load_workflow_from_string,
};
