//! Core task types: the declarative unit scheduled by the DAG, the result it
//! produces, and the seam through which a tool is actually invoked.

use crate::workflow::argument::ArgumentValue;
use crate::workflow::cancellation::ChildToken;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Unique identifier for a workflow task.
///
/// TaskId wraps a string identifier and implements the necessary traits
/// for use as a HashMap key and graph node identifier.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a new TaskId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the TaskId and returns the underlying string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Dependency strength between tasks.
///
/// Hard dependencies must complete successfully before the dependent
/// task can execute. Soft dependencies represent preference but not
/// requirements (not yet enforced in v0.1).
#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dependency {
    /// Task must complete successfully (blocking dependency)
    Hard,
    /// Task should complete if possible (non-blocking, planned for v0.2)
    Soft,
}

/// Distinguishes how a task's `code`/`intent` fields, if present, should be
/// interpreted by the tool invoker. Purely descriptive; the scheduler never
/// branches on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    McpTool,
    CodeExecution,
}

/// A task as it appears in a DAG definition: a tool to invoke, the arguments
/// to resolve for it, and the dependencies that gate it. Immutable once
/// constructed; all scheduling state lives outside this type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub tool: String,
    #[serde(default)]
    pub arguments: HashMap<String, ArgumentValue>,
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    #[serde(default)]
    pub kind: Option<TaskKind>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub intent: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(id),
            tool: tool.into(),
            arguments: HashMap::new(),
            depends_on: Vec::new(),
            kind: None,
            code: None,
            intent: None,
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: ArgumentValue) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Outcome status of a single task execution attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Error,
}

/// The result of running one task once. Serialized into checkpoints and
/// emitted on the event stream, so its shape is load-bearing beyond this
/// process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// Set only on error: whether the failure is recoverable (does not
    /// poison dependents) or fatal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recoverable: Option<bool>,
}

impl TaskResult {
    pub fn success(task_id: TaskId, output: Value, execution_time_ms: u64) -> Self {
        Self {
            task_id,
            status: TaskStatus::Success,
            output: Some(output),
            error: None,
            execution_time_ms: Some(execution_time_ms),
            recoverable: None,
        }
    }

    pub fn error(task_id: TaskId, error: impl Into<String>, recoverable: bool) -> Self {
        Self {
            task_id,
            status: TaskStatus::Error,
            output: None,
            error: Some(error.into()),
            execution_time_ms: None,
            recoverable: Some(recoverable),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, TaskStatus::Success)
    }
}

/// Error types for task execution.
#[derive(thiserror::Error, Debug, Clone)]
pub enum TaskError {
    /// Task execution failed with a message
    #[error("Task execution failed: {0}")]
    ExecutionFailed(String),

    /// A hard dependency failed, so this task cannot run
    #[error("Dependency task {dependency} failed: {reason}")]
    DependencyFailed { dependency: TaskId, reason: String },

    /// Task exceeded its configured timeout
    #[error("task timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Task was cancelled via its cancellation token
    #[error("task cancelled")]
    Cancelled,

    /// No executor is registered for the task's tool id
    #[error("tool '{0}' is not registered")]
    UnknownTool(String),

    /// Task was skipped due to workflow state
    #[error("Task skipped: {0}")]
    Skipped(String),

    /// I/O error during task execution
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic error wrapper
    #[error("Task error: {0}")]
    Other(String),
}

impl TaskError {
    /// Whether this failure is recoverable: does not necessarily poison the
    /// whole workflow the way a dependency failure or cancellation does.
    pub fn recoverable(&self) -> bool {
        !matches!(self, TaskError::DependencyFailed { .. } | TaskError::Cancelled)
    }
}

impl From<std::io::Error> for TaskError {
    fn from(e: std::io::Error) -> Self {
        TaskError::Io(e.to_string())
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(e: anyhow::Error) -> Self {
        TaskError::Other(e.to_string())
    }
}

/// Context handed to a [`TaskExecutor`] for a single invocation: resolved
/// arguments (not the raw [`ArgumentValue`] schema) plus identity and a
/// cancellation handle scoped to this task.
pub struct TaskExecutionContext {
    pub workflow_id: String,
    pub task_id: TaskId,
    pub arguments: HashMap<String, Value>,
    pub cancellation: ChildToken,
}

/// The tool invocation seam. A task names a tool by id; the Task Runner
/// looks up the matching executor in a registry and calls `execute` with
/// already-resolved arguments. Implementations stand in for what would
/// otherwise be an out-of-process tool call.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// The tool id this executor answers to, matched against `Task::tool`.
    fn tool_id(&self) -> &str;

    async fn execute(&self, context: &TaskExecutionContext) -> Result<Value, TaskError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::cancellation::CancellationTokenSource;
    use std::collections::HashSet;

    #[test]
    fn test_task_id_equality() {
        let id1 = TaskId::new("task-1");
        let id2 = TaskId::new("task-1");
        let id3 = TaskId::new("task-2");

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn test_task_id_hash() {
        let mut set = HashSet::new();

        set.insert(TaskId::new("task-1"));
        set.insert(TaskId::new("task-1"));
        set.insert(TaskId::new("task-2"));

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_task_id_from_string() {
        let id1: TaskId = "task-1".into();
        let id2: TaskId = TaskId::from(String::from("task-1"));

        assert_eq!(id1, id2);
        assert_eq!(id1.as_str(), "task-1");
    }

    #[test]
    fn test_task_id_display() {
        let id = TaskId::new("task-1");
        assert_eq!(format!("{}", id), "task-1");
    }

    #[test]
    fn test_dependency_variants() {
        let hard = Dependency::Hard;
        let soft = Dependency::Soft;

        assert_ne!(hard, soft);
    }

    #[test]
    fn test_task_result_success_and_error() {
        let success = TaskResult::success(TaskId::new("t1"), Value::from(1), 10);
        assert!(success.is_success());
        assert_eq!(success.execution_time_ms, Some(10));

        let failed = TaskResult::error(TaskId::new("t1"), "boom", true);
        assert!(!failed.is_success());
        assert_eq!(failed.recoverable, Some(true));
    }

    #[test]
    fn test_task_builder() {
        let task = Task::new("t1", "fetch")
            .with_argument(
                "url",
                ArgumentValue::Literal {
                    value: Value::from("https://example.com"),
                },
            )
            .depends_on("t0")
            .with_kind(TaskKind::McpTool);

        assert_eq!(task.depends_on, vec![TaskId::new("t0")]);
        assert!(task.arguments.contains_key("url"));
        assert_eq!(task.kind, Some(TaskKind::McpTool));
    }

    #[test]
    fn test_task_error_recoverable() {
        assert!(TaskError::ExecutionFailed("x".into()).recoverable());
        assert!(!TaskError::DependencyFailed {
            dependency: TaskId::new("task-1"),
            reason: "failed".into()
        }
        .recoverable());
        assert!(!TaskError::Cancelled.recoverable());
    }

    // Mock executor for testing the TaskExecutor trait.
    struct EchoExecutor;

    #[async_trait]
    impl TaskExecutor for EchoExecutor {
        fn tool_id(&self) -> &str {
            "echo"
        }

        async fn execute(&self, context: &TaskExecutionContext) -> Result<Value, TaskError> {
            Ok(Value::Object(context.arguments.clone().into_iter().collect()))
        }
    }

    #[tokio::test]
    async fn test_task_executor_trait() {
        let executor = EchoExecutor;
        assert_eq!(executor.tool_id(), "echo");

        let source = CancellationTokenSource::new();
        let context = TaskExecutionContext {
            workflow_id: "workflow-1".into(),
            task_id: TaskId::new("task-1"),
            arguments: HashMap::new(),
            cancellation: source.child_token(),
        };

        let result = executor.execute(&context).await.unwrap();
        assert_eq!(result, Value::Object(Default::default()));
    }

    #[tokio::test]
    async fn test_task_executor_with_dependencies_declared_on_task() {
        let task = Task::new("task-b", "fetch").depends_on("task-a");
        assert_eq!(task.depends_on.len(), 1);
        assert_eq!(task.depends_on[0], TaskId::new("task-a"));
    }
}
