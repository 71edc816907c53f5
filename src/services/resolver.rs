//! Variable Resolver (C2): a lazy interpolation engine over `${...}`
//! expressions with scoped namespaces, a default operator, and a handful
//! of built-in functions.

use crate::domain::error::{EngineError, ErrorCategory, ErrorSeverity};
use crate::domain::models::{ReservedNamespace, ResolutionScope};
use crate::domain::value::Value;
use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

const MAX_RECURSION_DEPTH: u32 = 10;

/// Resolve a value recursively and structurally (scalars, sequences,
/// mappings all walked). Depth is capped to bound circular references.
pub fn resolve(value: &Value, scope: &ResolutionScope) -> Result<Value, EngineError> {
    resolve_depth(value, scope, 0)
}

fn resolve_depth(value: &Value, scope: &ResolutionScope, depth: u32) -> Result<Value, EngineError> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(EngineError::new(
            ErrorCategory::Runtime,
            "RESOLVER_DEPTH_EXCEEDED",
            ErrorSeverity::Error,
            format!("variable resolution exceeded max depth of {MAX_RECURSION_DEPTH}"),
        ));
    }

    match value {
        Value::String(s) => resolve_string(s, scope, depth),
        Value::Sequence(items) => {
            let resolved = items
                .iter()
                .map(|v| resolve_depth(v, scope, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Sequence(resolved))
        }
        Value::Mapping(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_depth(v, scope, depth + 1)?);
            }
            Ok(Value::Mapping(out))
        }
        other => Ok(other.clone()),
    }
}

/// A string that is exactly one expression evaluates to the raw typed
/// value; otherwise textual substitution is performed (missing/null -> "").
fn resolve_string(s: &str, scope: &ResolutionScope, depth: u32) -> Result<Value, EngineError> {
    if let Some(expr) = exact_single_expression(s) {
        return eval_expression(expr, scope, depth);
    }

    let mut out = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = find_matching_close(after) else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let expr = &after[..end];
        let resolved = eval_expression(expr, scope, depth)?;
        out.push_str(&resolved.to_display_string());
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

/// True iff the whole string is a single `${...}` expression with nothing
/// before or after it.
fn exact_single_expression(s: &str) -> Option<&str> {
    let s = s.trim();
    let after_prefix = s.strip_prefix("${")?;
    let close = find_matching_close(after_prefix)?;
    if close == after_prefix.len() - 1 {
        Some(&after_prefix[..close])
    } else {
        None
    }
}

fn find_matching_close(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

/// Evaluate a single expression body (the text between `${` and `}`).
/// Grammar: `path`, `path()`, or `lhs || rhs` where rhs is a literal or
/// another expression.
fn eval_expression(expr: &str, scope: &ResolutionScope, depth: u32) -> Result<Value, EngineError> {
    let expr = expr.trim();

    if let Some(idx) = find_default_operator(expr) {
        let (lhs, rhs) = (expr[..idx].trim(), expr[idx + 2..].trim());
        let left = eval_operand(lhs, scope, depth);
        return match left {
            Ok(v) if !v.is_unset() => Ok(v),
            _ => eval_default_rhs(rhs, scope, depth),
        };
    }

    eval_operand(expr, scope, depth)
}

fn find_default_operator(expr: &str) -> Option<usize> {
    let bytes = expr.as_bytes();
    let mut i = 0;
    let mut in_quote: Option<u8> = None;
    while i + 1 < bytes.len() {
        match in_quote {
            Some(q) if bytes[i] == q => in_quote = None,
            Some(_) => {}
            None => match bytes[i] {
                b'\'' | b'"' => in_quote = Some(bytes[i]),
                b'|' if bytes[i + 1] == b'|' => return Some(i),
                _ => {}
            },
        }
        i += 1;
    }
    None
}

fn eval_default_rhs(rhs: &str, scope: &ResolutionScope, depth: u32) -> Result<Value, EngineError> {
    if let Some(lit) = parse_literal(rhs) {
        return Ok(lit);
    }
    eval_operand(rhs, scope, depth)
}

fn parse_literal(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Some(inner) = s.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
        return Some(Value::String(inner.to_string()));
    }
    if let Some(inner) = s.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        return Some(Value::String(inner.to_string()));
    }
    match s {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        _ => {}
    }
    s.parse::<f64>().ok().map(Value::Number)
}

/// A path expression or a builtin function call.
fn eval_operand(expr: &str, scope: &ResolutionScope, depth: u32) -> Result<Value, EngineError> {
    if let Some(name) = expr.strip_suffix("()") {
        return eval_builtin(name, scope);
    }
    eval_path(expr, scope, depth)
}

fn eval_builtin(name: &str, scope: &ResolutionScope) -> Result<Value, EngineError> {
    match name {
        "now" => Ok(Value::String(Utc::now().to_rfc3339())),
        "uuid" => Ok(Value::String(Uuid::new_v4().to_string())),
        "timestamp" => Ok(Value::Number(Utc::now().timestamp_millis() as f64)),
        "workflowId" => Ok(scope.workflow.as_ref().map_or(Value::Null, |w| Value::String(w.id.clone()))),
        "workflowName" => Ok(scope.workflow.as_ref().map_or(Value::Null, |w| Value::String(w.name.clone()))),
        "runId" => Ok(scope.run.as_ref().map_or(Value::Null, |r| Value::String(r.id.to_string()))),
        "attempt" => Ok(scope.run.as_ref().map_or(Value::Null, |r| Value::Number(f64::from(r.attempt)))),
        "triggeredBy" => Ok(scope
            .run
            .as_ref()
            .and_then(|r| r.triggered_by.clone())
            .map_or(Value::Null, Value::String)),
        other => Err(unknown_builtin(other)),
    }
}

fn unknown_builtin(name: &str) -> EngineError {
    EngineError::new(
        ErrorCategory::Runtime,
        "UNKNOWN_BUILTIN",
        ErrorSeverity::Error,
        format!("unknown builtin function '{name}()'"),
    )
}

/// Path: `<namespace>.<key>(.<key>)*`.
fn eval_path(expr: &str, scope: &ResolutionScope, depth: u32) -> Result<Value, EngineError> {
    let mut parts = expr.splitn(2, '.');
    let namespace = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();

    if let Some(reserved) = ReservedNamespace::parse(namespace) {
        return Err(EngineError::new(
            ErrorCategory::Runtime,
            "RESERVED_NAMESPACE",
            ErrorSeverity::Error,
            format!("namespace '{namespace:?}' ({reserved:?}) is reserved and not implemented"),
        ));
    }

    match namespace {
        "env" => lookup(&scope.env, rest, namespace),
        "inputs" => lookup(&scope.inputs, rest, namespace),
        "secrets" => lookup(&scope.secrets, rest, namespace),
        "metadata" => lookup(&scope.metadata, rest, namespace),
        "context" => lookup(&scope.context, rest, namespace),
        "workflow" => eval_workflow_namespace(rest, scope),
        "run" => eval_run_namespace(rest, scope),
        "steps" => eval_steps_namespace(rest, scope, depth),
        other => Err(EngineError::new(
            ErrorCategory::Runtime,
            "UNKNOWN_NAMESPACE",
            ErrorSeverity::Error,
            format!("unknown namespace '{other}'"),
        )),
    }
}

fn lookup(map: &BTreeMap<String, Value>, path: &str, namespace: &str) -> Result<Value, EngineError> {
    if path.is_empty() {
        return Ok(Value::Mapping(map.clone()));
    }
    let mut parts = path.splitn(2, '.');
    let key = parts.next().unwrap_or_default();
    match map.get(key) {
        Some(v) => match parts.next() {
            Some(remainder) => Ok(v.get_path(remainder).cloned().unwrap_or(Value::Null)),
            None => Ok(v.clone()),
        },
        None => Err(EngineError::new(
            ErrorCategory::Runtime,
            "LOOKUP_FAILED",
            ErrorSeverity::Error,
            format!("'{key}' not found in namespace '{namespace}'"),
        )),
    }
}

fn eval_workflow_namespace(path: &str, scope: &ResolutionScope) -> Result<Value, EngineError> {
    let Some(wf) = scope.workflow.as_ref() else {
        return Ok(Value::Null);
    };
    Ok(match path {
        "id" => Value::String(wf.id.clone()),
        "name" => Value::String(wf.name.clone()),
        "version" => wf.version.clone().map_or(Value::Null, Value::String),
        "description" => wf.description.clone().map_or(Value::Null, Value::String),
        "owner" => wf.owner.clone().map_or(Value::Null, Value::String),
        "tags" => Value::Sequence(wf.tags.iter().cloned().map(Value::String).collect()),
        _ => Value::Null,
    })
}

fn eval_run_namespace(path: &str, scope: &ResolutionScope) -> Result<Value, EngineError> {
    let Some(run) = scope.run.as_ref() else {
        return Ok(Value::Null);
    };
    Ok(match path {
        "id" => Value::String(run.id.to_string()),
        "timestamp" => Value::String(run.timestamp.to_rfc3339()),
        "attempt" => Value::Number(f64::from(run.attempt)),
        "triggeredBy" => run.triggered_by.clone().map_or(Value::Null, Value::String),
        _ => Value::Null,
    })
}

/// For `steps`, the first key after the namespace is a stepId; the rest
/// dereferences into that step's recorded output.
fn eval_steps_namespace(path: &str, scope: &ResolutionScope, _depth: u32) -> Result<Value, EngineError> {
    let mut parts = path.splitn(2, '.');
    let step_id = parts.next().unwrap_or_default();
    let Some(output) = scope.steps.get(step_id) else {
        let available: Vec<&str> = scope.steps.keys().map(String::as_str).collect();
        return Err(EngineError::new(
            ErrorCategory::Runtime,
            "LOOKUP_FAILED",
            ErrorSeverity::Error,
            format!("step '{step_id}' has no recorded output; available steps: {available:?}"),
        ));
    };
    match parts.next() {
        Some(remainder) => Ok(output.get_path(remainder).cloned().unwrap_or(Value::Null)),
        None => Ok(output.clone()),
    }
}

/// Static validation pass: walk every `with`, `env`, `when`, `outputs`
/// value and assert every `${steps.X...}` reference names an earlier step
/// (spec §4.2, the "forward reference" rule).
pub fn validate_forward_references(value: &str, step_id: &str, declared_index: &dyn Fn(&str) -> Option<usize>, this_index: usize) -> Result<(), EngineError> {
    let mut rest = value;
    while let Some(start) = rest.find("${steps.") {
        let after = &rest[start + 8..];
        let end = after.find(|c: char| c == '.' || c == '}' || c == ' ').unwrap_or(after.len());
        let referenced = &after[..end];
        match declared_index(referenced) {
            Some(idx) if idx < this_index => {}
            Some(_) => {
                return Err(EngineError::new(
                    ErrorCategory::Validation,
                    "FORWARD_REFERENCE",
                    ErrorSeverity::Error,
                    format!("step '{step_id}' references '${{steps.{referenced}...}}' which is declared later"),
                ));
            }
            None => {
                return Err(EngineError::new(
                    ErrorCategory::Validation,
                    "UNKNOWN_STEP",
                    ErrorSeverity::Error,
                    format!("step '{step_id}' references unknown step '{referenced}'"),
                ));
            }
        }
        rest = &after[end..];
    }
    Ok(())
}
