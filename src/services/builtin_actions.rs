//! Built-in test/demo action handlers (`noop`, `echo`, `sleep`, `fail`).
//!
//! Grounded on the teacher's `services::builtin_handlers` module shape:
//! small, single-purpose handler structs. These exist so the crate's own
//! test suite and the demo binary can exercise the kernel without an
//! external HTTP/shell/db action provider (those remain out of scope per
//! spec §1).

use crate::domain::error::{EngineError, ErrorCategory, ErrorSeverity};
use crate::domain::value::Value;
use crate::services::action_registry::{ActionContext, ActionHandler, ActionResult, Capabilities};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Always succeeds with an empty mapping.
pub struct NoopHandler;

#[async_trait]
impl ActionHandler for NoopHandler {
    fn name(&self) -> &str {
        "noop"
    }
    fn supported_actions(&self) -> Vec<String> {
        vec!["noop".to_string()]
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities { concurrent: true, cacheable: true, idempotent: true }
    }
    async fn execute(&self, _action: &str, _input: &BTreeMap<String, Value>, _ctx: &ActionContext) -> ActionResult {
        ActionResult::ok(Value::Mapping(BTreeMap::new()))
    }
}

/// Succeeds, returning its resolved input verbatim as output.
pub struct EchoHandler;

#[async_trait]
impl ActionHandler for EchoHandler {
    fn name(&self) -> &str {
        "echo"
    }
    fn supported_actions(&self) -> Vec<String> {
        vec!["echo".to_string()]
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities { concurrent: true, cacheable: true, idempotent: true }
    }
    async fn execute(&self, _action: &str, input: &BTreeMap<String, Value>, _ctx: &ActionContext) -> ActionResult {
        ActionResult::ok(Value::Mapping(input.clone()))
    }
}

/// Sleeps for the duration (ms) given by input key `ms`, then succeeds.
/// Useful for exercising timeout and parallel-phase scenarios in tests.
pub struct SleepHandler;

#[async_trait]
impl ActionHandler for SleepHandler {
    fn name(&self) -> &str {
        "sleep"
    }
    fn supported_actions(&self) -> Vec<String> {
        vec!["sleep".to_string()]
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities { concurrent: true, cacheable: false, idempotent: true }
    }
    async fn execute(&self, _action: &str, input: &BTreeMap<String, Value>, _ctx: &ActionContext) -> ActionResult {
        let ms = input.get("ms").and_then(Value::as_number).unwrap_or(0.0) as u64;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        ActionResult::ok(Value::Mapping(BTreeMap::new()))
    }
}

/// Always fails. Input key `code` (default `ORB-E-ADAPTER_ERROR`) controls
/// the returned error code, letting tests exercise retryable vs. permanent
/// failures.
pub struct FailHandler;

#[async_trait]
impl ActionHandler for FailHandler {
    fn name(&self) -> &str {
        "fail"
    }
    fn supported_actions(&self) -> Vec<String> {
        vec!["fail".to_string()]
    }
    async fn execute(&self, _action: &str, input: &BTreeMap<String, Value>, _ctx: &ActionContext) -> ActionResult {
        let code = input.get("code").and_then(Value::as_str).unwrap_or("ORB-E-ADAPTER_ERROR");
        let message = input
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("fail handler invoked")
            .to_string();
        let mut err = EngineError::new(ErrorCategory::Execution, "ADAPTER_ERROR", ErrorSeverity::Medium, message);
        err.code = code.to_string();
        ActionResult::err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ctx() -> ActionContext {
        ActionContext {
            workflow_name: "test".into(),
            step_id: "s".into(),
            execution_id: Uuid::new_v4(),
            secrets: BTreeMap::new(),
            timeout_ms: 1000,
            env: BTreeMap::new(),
            step_outputs: BTreeMap::new(),
            inputs: BTreeMap::new(),
            workflow_context: BTreeMap::new(),
            temp_dir: std::env::temp_dir(),
            cwd: std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from(".")),
            cancel_token: crate::services::step_executor::new_cancel_pair().1,
        }
    }

    #[tokio::test]
    async fn echo_returns_its_input() {
        let mut input = BTreeMap::new();
        input.insert("x".to_string(), Value::Number(1.0));
        let result = EchoHandler.execute("echo", &input, &ctx()).await;
        assert!(result.success);
        assert_eq!(result.output.get_path("x"), Some(&Value::Number(1.0)));
    }

    #[tokio::test]
    async fn fail_returns_configured_code() {
        let mut input = BTreeMap::new();
        input.insert("code".to_string(), Value::String("ORB-R-RESOURCE_EXHAUSTED".into()));
        let result = FailHandler.execute("fail", &input, &ctx()).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, "ORB-R-RESOURCE_EXHAUSTED");
    }
}
