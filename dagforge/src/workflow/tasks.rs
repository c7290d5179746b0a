//! Demonstration [`TaskExecutor`] implementations.
//!
//! These exist for testing and as templates, not as a production tool
//! catalogue — registering a real tool means implementing `TaskExecutor`
//! and adding it to the scheduler's executor map, not extending this file.

use crate::workflow::task::{TaskError, TaskExecutionContext, TaskExecutor};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use tokio::process::Command as ProcessCommand;

/// Wraps a plain async function as a [`TaskExecutor`]. Useful for tests and
/// small demo workflows that don't need an out-of-process tool call.
pub struct FunctionExecutor {
    tool_id: String,
    f: Box<
        dyn Fn(&TaskExecutionContext) -> Pin<Box<dyn Future<Output = Result<Value, TaskError>> + Send>>
            + Send
            + Sync,
    >,
}

impl FunctionExecutor {
    pub fn new<F, Fut>(tool_id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&TaskExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        Self {
            tool_id: tool_id.into(),
            f: Box::new(move |ctx| Box::pin(f(ctx)) as Pin<Box<dyn Future<Output = Result<Value, TaskError>> + Send>>),
        }
    }
}

#[async_trait::async_trait]
impl TaskExecutor for FunctionExecutor {
    fn tool_id(&self) -> &str {
        &self.tool_id
    }

    async fn execute(&self, context: &TaskExecutionContext) -> Result<Value, TaskError> {
        (self.f)(context).await
    }
}

/// Invokes an external program, passing the task's resolved `command` and
/// `args` arguments straight to `tokio::process::Command`. `command`'s
/// stdout (trimmed) becomes the task's output value; a non-zero exit
/// status is reported as a recoverable `TaskError::ExecutionFailed`.
pub struct ShellExecutor {
    tool_id: String,
}

impl ShellExecutor {
    pub fn new(tool_id: impl Into<String>) -> Self {
        Self { tool_id: tool_id.into() }
    }
}

#[async_trait::async_trait]
impl TaskExecutor for ShellExecutor {
    fn tool_id(&self) -> &str {
        &self.tool_id
    }

    async fn execute(&self, context: &TaskExecutionContext) -> Result<Value, TaskError> {
        let command = context
            .arguments
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TaskError::ExecutionFailed("missing 'command' argument".to_string()))?;

        let args: Vec<String> = context
            .arguments
            .get("args")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
            .unwrap_or_default();

        let output = ProcessCommand::new(command)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(TaskError::from)?;

        if !output.status.success() {
            return Err(TaskError::ExecutionFailed(format!(
                "'{command}' exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(Value::String(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::cancellation::CancellationTokenSource;
    use crate::workflow::task::TaskId;
    use std::collections::HashMap;

    fn context(arguments: HashMap<String, Value>) -> TaskExecutionContext {
        let source = CancellationTokenSource::new();
        TaskExecutionContext {
            workflow_id: "w1".into(),
            task_id: TaskId::new("t1"),
            arguments,
            cancellation: source.child_token(),
        }
    }

    #[tokio::test]
    async fn function_executor_runs_the_closure() {
        let executor = FunctionExecutor::new("double", |ctx: &TaskExecutionContext| {
            let n = ctx.arguments.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            async move { Ok(Value::from(n * 2)) }
        });

        let mut args = HashMap::new();
        args.insert("n".to_string(), Value::from(21));
        let result = executor.execute(&context(args)).await.unwrap();

        assert_eq!(result, Value::from(42));
        assert_eq!(executor.tool_id(), "double");
    }

    #[tokio::test]
    async fn shell_executor_captures_stdout() {
        let executor = ShellExecutor::new("shell");
        let mut args = HashMap::new();
        args.insert("command".to_string(), Value::String("echo".to_string()));
        args.insert("args".to_string(), serde_json::json!(["hello"]));

        let result = executor.execute(&context(args)).await.unwrap();
        assert_eq!(result, Value::String("hello".to_string()));
    }

    #[tokio::test]
    async fn shell_executor_reports_nonzero_exit() {
        let executor = ShellExecutor::new("shell");
        let mut args = HashMap::new();
        args.insert("command".to_string(), Value::String("false".to_string()));

        let result = executor.execute(&context(args)).await;
        assert!(matches!(result, Err(TaskError::ExecutionFailed(_))));
    }

    #[tokio::test]
    async fn shell_executor_requires_command_argument() {
        let executor = ShellExecutor::new("shell");
        let result = executor.execute(&context(HashMap::new())).await;
        assert!(matches!(result, Err(TaskError::ExecutionFailed(_))));
    }
}
