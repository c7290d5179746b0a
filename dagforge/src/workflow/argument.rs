//! Argument resolution for workflow tasks.
//!
//! Resolves a task's declared arguments against prior task results and the
//! workflow's execution context. Three argument kinds are supported:
//! literals, named parameters, and path/template references into prior
//! results. The expression grammar is parsed once at DAG-acceptance time
//! into an [`Expression`] AST so resolution itself never re-parses.

use crate::workflow::task::{TaskId, TaskResult, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while parsing or evaluating argument expressions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    /// The reference expression could not be parsed.
    #[error("invalid reference expression '{0}'")]
    InvalidExpression(String),
}

/// A single accessor step in a path expression: `.name`, `[0]`, `["key"]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accessor {
    /// Field access (`.name`).
    Field(String),
    /// Array index access (`[0]`).
    Index(usize),
    /// Bracketed key access (`["key"]` or `['key']`).
    Key(String),
}

/// A parsed path: a root identifier followed by zero or more accessors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub root: String,
    pub accessors: Vec<Accessor>,
}

/// One piece of a backtick-quoted template: literal text or an interpolated path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplatePart {
    Literal(String),
    Interpolation(Path),
}

/// A parsed reference expression: either a bare path or a template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expression {
    Path(Path),
    Template(Vec<TemplatePart>),
}

impl Expression {
    /// Parses a reference expression string into an AST.
    ///
    /// Recognizes the legacy `$OUTPUT[taskId]` / `$OUTPUT[taskId].path` form
    /// and lowers it to the same `Expression::Path` shape as the modern
    /// `root.accessor` grammar, so there is exactly one evaluator.
    pub fn parse(expr: &str) -> Result<Self, ArgumentError> {
        let expr = expr.trim();
        if expr.starts_with('`') {
            return Self::parse_template(expr);
        }
        if let Some(rest) = expr.strip_prefix("$OUTPUT[") {
            return Self::parse_legacy_output(rest, expr);
        }
        Ok(Expression::Path(parse_path(expr)?))
    }

    fn parse_legacy_output(rest: &str, original: &str) -> Result<Self, ArgumentError> {
        let close = rest
            .find(']')
            .ok_or_else(|| ArgumentError::InvalidExpression(original.to_string()))?;
        let task_id = &rest[..close];
        let remainder = &rest[close + 1..];
        let mut normalized = task_id.to_string();
        normalized.push_str(remainder);
        Ok(Expression::Path(parse_path(&normalized)?))
    }

    fn parse_template(expr: &str) -> Result<Self, ArgumentError> {
        let inner = expr
            .strip_prefix('`')
            .and_then(|s| s.strip_suffix('`'))
            .ok_or_else(|| ArgumentError::InvalidExpression(expr.to_string()))?;

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = inner.char_indices().peekable();
        while let Some((_, c)) = chars.next() {
            if c == '$' && chars.peek().map(|(_, c)| *c) == Some('{') {
                chars.next();
                let mut depth = 1;
                let mut interp = String::new();
                for (_, c2) in chars.by_ref() {
                    if c2 == '{' {
                        depth += 1;
                        interp.push(c2);
                    } else if c2 == '}' {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                        interp.push(c2);
                    } else {
                        interp.push(c2);
                    }
                }
                if !literal.is_empty() {
                    parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(TemplatePart::Interpolation(parse_path(interp.trim())?));
            } else {
                literal.push(c);
            }
        }
        if !literal.is_empty() {
            parts.push(TemplatePart::Literal(literal));
        }
        Ok(Expression::Template(parts))
    }
}

fn parse_path(expr: &str) -> Result<Path, ArgumentError> {
    let bytes = expr.as_bytes();
    if bytes.is_empty() {
        return Err(ArgumentError::InvalidExpression(expr.to_string()));
    }

    let mut i = 0;
    while i < bytes.len() && bytes[i] != b'.' && bytes[i] != b'[' {
        i += 1;
    }
    let root = expr[..i].to_string();
    if root.is_empty() {
        return Err(ArgumentError::InvalidExpression(expr.to_string()));
    }

    let mut accessors = Vec::new();
    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                i += 1;
                let start = i;
                while i < bytes.len() && bytes[i] != b'.' && bytes[i] != b'[' {
                    i += 1;
                }
                if start == i {
                    return Err(ArgumentError::InvalidExpression(expr.to_string()));
                }
                accessors.push(Accessor::Field(expr[start..i].to_string()));
            }
            b'[' => {
                let close = expr[i..]
                    .find(']')
                    .map(|p| p + i)
                    .ok_or_else(|| ArgumentError::InvalidExpression(expr.to_string()))?;
                let inner = expr[i + 1..close].trim();
                if let Ok(idx) = inner.parse::<usize>() {
                    accessors.push(Accessor::Index(idx));
                } else {
                    let key = inner
                        .trim_matches(|c| c == '"' || c == '\'')
                        .to_string();
                    accessors.push(Accessor::Key(key));
                }
                i = close + 1;
            }
            _ => return Err(ArgumentError::InvalidExpression(expr.to_string())),
        }
    }

    Ok(Path { root, accessors })
}

/// A single task argument's declared value.
///
/// Tagged union replacing a three-branch runtime type switch: literals pass
/// through, parameters look up the execution context, references evaluate a
/// parsed expression over prior results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArgumentValue {
    /// Copied through unchanged.
    Literal { value: Value },
    /// Looked up in the execution context, then its `parameters` map.
    Parameter { name: String },
    /// Evaluated as a path/template expression over prior results and context.
    Reference { expression: String },
}

/// Execution context available to argument resolution: workflow-scoped
/// parameters and arbitrary context values.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub parameters: HashMap<String, Value>,
    #[serde(flatten)]
    pub context: HashMap<String, Value>,
}

/// Resolves every declared argument of a task against prior results and the
/// execution context. Pure: identical inputs produce identical output.
pub fn resolve(
    args_schema: &HashMap<String, ArgumentValue>,
    execution_context: &ExecutionContext,
    prior_results: &HashMap<TaskId, TaskResult>,
) -> Result<HashMap<String, Value>, ArgumentError> {
    let mut out = HashMap::with_capacity(args_schema.len());
    for (name, value) in args_schema {
        match value {
            ArgumentValue::Literal { value } => {
                out.insert(name.clone(), value.clone());
            }
            ArgumentValue::Parameter { name: pname } => {
                if let Some(v) = execution_context.parameters.get(pname) {
                    out.insert(name.clone(), v.clone());
                } else if let Some(v) = execution_context.context.get(pname) {
                    out.insert(name.clone(), v.clone());
                }
                // Absent name is omitted, not fatal.
            }
            ArgumentValue::Reference { expression } => {
                let parsed = Expression::parse(expression)?;
                if let Some(v) = evaluate(&parsed, execution_context, prior_results) {
                    out.insert(name.clone(), v);
                }
            }
        }
    }
    Ok(out)
}

fn evaluate(
    expr: &Expression,
    ctx: &ExecutionContext,
    prior_results: &HashMap<TaskId, TaskResult>,
) -> Option<Value> {
    match expr {
        Expression::Path(path) => evaluate_path(path, ctx, prior_results),
        Expression::Template(parts) => {
            let mut s = String::new();
            for part in parts {
                match part {
                    TemplatePart::Literal(lit) => s.push_str(lit),
                    TemplatePart::Interpolation(path) => {
                        if let Some(v) = evaluate_path(path, ctx, prior_results) {
                            s.push_str(&render_scalar(&v));
                        }
                        // Missing interpolations render as empty string.
                    }
                }
            }
            Some(Value::String(s))
        }
    }
}

fn render_scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn resolve_root(
    root: &str,
    ctx: &ExecutionContext,
    prior_results: &HashMap<TaskId, TaskResult>,
) -> Option<Value> {
    let task_id = TaskId::new(root);
    if let Some(result) = prior_results.get(&task_id) {
        return Some(task_result_as_value(result));
    }
    if let Some(v) = ctx.context.get(root) {
        return Some(v.clone());
    }
    ctx.parameters.get(root).cloned()
}

fn task_result_as_value(result: &TaskResult) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(
        "status".to_string(),
        Value::String(
            match result.status {
                TaskStatus::Success => "success",
                TaskStatus::Error => "error",
            }
            .to_string(),
        ),
    );
    if let Some(output) = &result.output {
        map.insert("result".to_string(), output.clone());
        // Historical convenience: also expose output at the top level so
        // `t1.field` and `t1.result.field` both resolve.
        if let Value::Object(fields) = output {
            for (k, v) in fields {
                map.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
    }
    if let Some(error) = &result.error {
        map.insert("error".to_string(), Value::String(error.clone()));
    }
    Value::Object(map)
}

fn evaluate_path(
    path: &Path,
    ctx: &ExecutionContext,
    prior_results: &HashMap<TaskId, TaskResult>,
) -> Option<Value> {
    let mut current = resolve_root(&path.root, ctx, prior_results)?;
    for accessor in &path.accessors {
        current = apply_accessor(current, accessor)?;
    }
    Some(current)
}

fn apply_accessor(value: Value, accessor: &Accessor) -> Option<Value> {
    match (accessor, value) {
        (Accessor::Field(name), Value::Object(mut map)) => map.remove(name),
        (Accessor::Key(name), Value::Object(mut map)) => map.remove(name),
        (Accessor::Index(idx), Value::Array(mut arr)) => {
            if *idx < arr.len() {
                Some(arr.swap_remove(*idx))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Explicit-wins union of resolved arguments with caller-supplied overrides.
pub fn merge_arguments(
    resolved: HashMap<String, Value>,
    explicit: HashMap<String, Value>,
) -> HashMap<String, Value> {
    let mut out = resolved;
    for (k, v) in explicit {
        out.insert(k, v);
    }
    out
}

/// Returns the names from `required` absent in `resolved`.
pub fn validate_required_arguments(
    resolved: &HashMap<String, Value>,
    required: &[String],
) -> Vec<String> {
    required
        .iter()
        .filter(|name| !resolved.contains_key(*name))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success_result(id: &str, output: Value) -> TaskResult {
        TaskResult {
            task_id: TaskId::new(id),
            status: TaskStatus::Success,
            output: Some(output),
            error: None,
            execution_time_ms: Some(5),
            recoverable: None,
        }
    }

    #[test]
    fn parses_simple_path() {
        let parsed = Expression::parse("t1.result.nested.value").unwrap();
        assert_eq!(
            parsed,
            Expression::Path(Path {
                root: "t1".into(),
                accessors: vec![
                    Accessor::Field("result".into()),
                    Accessor::Field("nested".into()),
                    Accessor::Field("value".into()),
                ],
            })
        );
    }

    #[test]
    fn parses_index_and_key_accessors() {
        let parsed = Expression::parse("t1.items[0][\"name\"]").unwrap();
        match parsed {
            Expression::Path(p) => {
                assert_eq!(p.root, "t1");
                assert_eq!(
                    p.accessors,
                    vec![
                        Accessor::Field("items".into()),
                        Accessor::Index(0),
                        Accessor::Key("name".into()),
                    ]
                );
            }
            _ => panic!("expected path"),
        }
    }

    #[test]
    fn resolves_nested_reference() {
        let mut priors = HashMap::new();
        priors.insert(
            TaskId::new("t1"),
            success_result("t1", serde_json::json!({"nested": {"value": 42}})),
        );
        let mut schema = HashMap::new();
        schema.insert(
            "extracted".to_string(),
            ArgumentValue::Reference {
                expression: "t1.result.nested.value".to_string(),
            },
        );
        let ctx = ExecutionContext::default();
        let resolved = resolve(&schema, &ctx, &priors).unwrap();
        assert_eq!(resolved.get("extracted"), Some(&Value::from(42)));
    }

    #[test]
    fn legacy_output_syntax_matches_modern_path() {
        let mut priors = HashMap::new();
        priors.insert(
            TaskId::new("t1"),
            success_result("t1", serde_json::json!({"nested": {"value": 42}})),
        );
        let mut schema = HashMap::new();
        schema.insert(
            "extracted".to_string(),
            ArgumentValue::Reference {
                expression: "$OUTPUT[t1].result.nested.value".to_string(),
            },
        );
        let ctx = ExecutionContext::default();
        let resolved = resolve(&schema, &ctx, &priors).unwrap();
        assert_eq!(resolved.get("extracted"), Some(&Value::from(42)));
    }

    #[test]
    fn missing_intermediate_is_omitted_not_fatal() {
        let mut priors = HashMap::new();
        priors.insert(TaskId::new("t1"), success_result("t1", serde_json::json!({})));
        let mut schema = HashMap::new();
        schema.insert(
            "missing".to_string(),
            ArgumentValue::Reference {
                expression: "t1.result.absent.value".to_string(),
            },
        );
        let ctx = ExecutionContext::default();
        let resolved = resolve(&schema, &ctx, &priors).unwrap();
        assert!(!resolved.contains_key("missing"));
    }

    #[test]
    fn template_interpolation_renders_string() {
        let mut priors = HashMap::new();
        priors.insert(TaskId::new("t1"), success_result("t1", serde_json::json!({"name": "world"})));
        let mut schema = HashMap::new();
        schema.insert(
            "greeting".to_string(),
            ArgumentValue::Reference {
                expression: "`hello ${t1.result.name}`".to_string(),
            },
        );
        let ctx = ExecutionContext::default();
        let resolved = resolve(&schema, &ctx, &priors).unwrap();
        assert_eq!(resolved.get("greeting"), Some(&Value::String("hello world".into())));
    }

    #[test]
    fn template_missing_interpolation_renders_empty() {
        let priors = HashMap::new();
        let mut schema = HashMap::new();
        schema.insert(
            "greeting".to_string(),
            ArgumentValue::Reference {
                expression: "`hello ${missing.value}`".to_string(),
            },
        );
        let ctx = ExecutionContext::default();
        let resolved = resolve(&schema, &ctx, &priors).unwrap();
        assert_eq!(resolved.get("greeting"), Some(&Value::String("hello ".into())));
    }

    #[test]
    fn parameter_falls_back_to_context() {
        let mut ctx = ExecutionContext::default();
        ctx.context.insert("userId".to_string(), Value::String("u-1".into()));
        let mut schema = HashMap::new();
        schema.insert(
            "user".to_string(),
            ArgumentValue::Parameter { name: "userId".to_string() },
        );
        let resolved = resolve(&schema, &ctx, &HashMap::new()).unwrap();
        assert_eq!(resolved.get("user"), Some(&Value::String("u-1".into())));
    }

    #[test]
    fn absent_parameter_is_omitted() {
        let ctx = ExecutionContext::default();
        let mut schema = HashMap::new();
        schema.insert(
            "user".to_string(),
            ArgumentValue::Parameter { name: "missing".to_string() },
        );
        let resolved = resolve(&schema, &ctx, &HashMap::new()).unwrap();
        assert!(!resolved.contains_key("user"));
    }

    #[test]
    fn merge_explicit_wins() {
        let mut resolved = HashMap::new();
        resolved.insert("a".to_string(), Value::from(1));
        let mut explicit = HashMap::new();
        explicit.insert("a".to_string(), Value::from(2));
        let merged = merge_arguments(resolved, explicit);
        assert_eq!(merged.get("a"), Some(&Value::from(2)));
    }

    #[test]
    fn validate_required_reports_missing() {
        let mut resolved = HashMap::new();
        resolved.insert("a".to_string(), Value::from(1));
        let missing = validate_required_arguments(&resolved, &["a".to_string(), "b".to_string()]);
        assert_eq!(missing, vec!["b".to_string()]);
    }

    #[test]
    fn array_index_out_of_range_is_omitted() {
        let mut priors = HashMap::new();
        priors.insert(TaskId::new("t1"), success_result("t1", serde_json::json!([1, 2])));
        let mut schema = HashMap::new();
        schema.insert(
            "x".to_string(),
            ArgumentValue::Reference { expression: "t1.result[9]".to_string() },
        );
        let ctx = ExecutionContext::default();
        let resolved = resolve(&schema, &ctx, &priors).unwrap();
        assert!(!resolved.contains_key("x"));
    }
}
