//! YAML workflow definition and parsing.
//!
//! Provides a YAML surface for defining a DAG declaratively, as an
//! alternative to building one up via [`crate::workflow::builder`] in Rust.

use crate::workflow::argument::ArgumentValue;
use crate::workflow::builder::WorkflowBuilder;
use crate::workflow::dag::{Dag, WorkflowError};
use crate::workflow::task::{Task, TaskId, TaskKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Workflow definition from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlWorkflow {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub tasks: Vec<YamlTask>,
}

/// Task definition from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlTask {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub kind: Option<TaskKind>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub arguments: std::collections::HashMap<String, ArgumentValue>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub intent: Option<String>,
}

/// Errors that can occur during YAML workflow parsing.
#[derive(Error, Debug)]
pub enum YamlWorkflowError {
    #[error("workflow has no tasks")]
    EmptyWorkflow,

    #[error("workflow graph error: {0}")]
    Graph(#[from] WorkflowError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

impl TryFrom<YamlWorkflow> for Dag {
    type Error = YamlWorkflowError;

    fn try_from(yaml_workflow: YamlWorkflow) -> Result<Self, Self::Error> {
        if yaml_workflow.tasks.is_empty() {
            return Err(YamlWorkflowError::EmptyWorkflow);
        }

        let mut builder = WorkflowBuilder::new();
        for yaml_task in &yaml_workflow.tasks {
            let mut task = Task::new(yaml_task.id.clone(), yaml_task.tool.clone());
            task.arguments = yaml_task.arguments.clone();
            task.kind = yaml_task.kind;
            task.code = yaml_task.code.clone();
            task.intent = yaml_task.intent.clone();
            for dep in &yaml_task.depends_on {
                task = task.depends_on(TaskId::new(dep.clone()));
            }
            builder = builder.add_task(task);
        }

        Ok(builder.build()?)
    }
}

/// Loads a workflow DAG from a YAML file.
pub async fn load_workflow_from_file(path: &Path) -> Result<Dag, YamlWorkflowError> {
    let content = tokio::fs::read_to_string(path).await?;
    load_workflow_from_string(&content)
}

/// Loads a workflow DAG from a YAML string.
///
/// ```ignore
/// let yaml = r#"
/// name: "My Workflow"
/// tasks:
///   - id: "fetch"
///     tool: "http_get"
///     arguments:
///       url:
///         kind: literal
///         value: "https://example.com"
/// "#;
/// let dag = load_workflow_from_string(yaml)?;
/// ```
pub fn load_workflow_from_string(yaml: &str) -> Result<Dag, YamlWorkflowError> {
    let yaml_workflow: YamlWorkflow = serde_yaml::from_str(yaml)?;
    yaml_workflow.try_into()
}
