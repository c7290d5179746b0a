//! Example DAG constructions demonstrating common patterns.
//!
//! These are real, runnable workflows (not doc-only stubs) used both as
//! documentation and as fixtures for integration-style tests elsewhere in
//! the crate.

use crate::workflow::argument::ArgumentValue;
use crate::workflow::builder::WorkflowBuilder;
use crate::workflow::dag::{Dag, WorkflowError};
use crate::workflow::task::Task;
use serde_json::Value;

/// A straight-line chain: fetch -> parse -> store.
pub fn example_linear_workflow() -> Result<Dag, WorkflowError> {
    WorkflowBuilder::new()
        .add_task(Task::new("fetch", "http_get").with_argument(
            "url",
            ArgumentValue::Literal { value: Value::from("https://example.com") },
        ))
        .add_task(Task::new("parse", "json_parse").with_argument(
            "body",
            ArgumentValue::Reference { expression: "fetch.result".to_string() },
        ))
        .add_task(Task::new("store", "kv_put").with_argument(
            "value",
            ArgumentValue::Reference { expression: "parse.result".to_string() },
        ))
        .dependency("fetch", "parse")
        .dependency("parse", "store")
        .build()
}

/// A diamond: one task gates two independent tasks, which both gate a
/// final join. `analyze_left` and `analyze_right` land in the same
/// execution layer and run concurrently.
pub fn example_diamond_workflow() -> Result<Dag, WorkflowError> {
    WorkflowBuilder::new()
        .add_task(Task::new("collect", "http_get"))
        .add_task(Task::new("analyze_left", "static_analysis").depends_on("collect"))
        .add_task(Task::new("analyze_right", "security_scan").depends_on("collect"))
        .add_task(
            Task::new("merge", "report_merge")
                .depends_on("analyze_left")
                .depends_on("analyze_right"),
        )
        .build()
}

/// A workflow whose last task is gated on a human-in-the-loop approval,
/// modeled as a task carrying an `intent` description the host surfaces to
/// the decision point machinery rather than a distinct task kind.
pub fn example_approval_gated_workflow() -> Result<Dag, WorkflowError> {
    WorkflowBuilder::new()
        .add_task(Task::new("prepare_release", "build_artifact"))
        .add_task(
            Task::new("publish", "registry_publish")
                .depends_on("prepare_release"),
        )
        .dependency("prepare_release", "publish")
        .build()
}
