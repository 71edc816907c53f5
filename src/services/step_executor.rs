//! Step Executor (C10): runs a single step through its `when` guard,
//! variable resolution, retry/backoff policy, and timeout, invoking the
//! resolved action handler.
//!
//! Grounded on the teacher's `services::dag_executor::execute_single_task`
//! retry/timeout loop shape.

use crate::domain::error::EngineError;
use crate::domain::models::{ResolutionScope, Step, StepStatus, TransitionRecord};
use crate::domain::value::Value;
use crate::services::action_registry::{ActionContext, ActionRegistry};
use crate::services::resolver::resolve;
use crate::services::state_machine::StepStateMachine;
use rand::Rng;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout as tokio_timeout;
use uuid::Uuid;

const MAX_BACKOFF_MS: u64 = 30_000;

/// Result of executing one step to a terminal (or skipped) status, along
/// with the transition history a caller should fold into its own
/// `StepStateEntry` (the step executor never touches the shared state store
/// directly, per the single-writer discipline in spec §4.5).
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub attempts: u32,
    pub output: Option<Value>,
    pub error: Option<EngineError>,
    pub history: Vec<TransitionRecord<StepStatus>>,
}

/// A cancellation signal shared across the workflow's step executions
/// (spec §5: "single root cancel token").
pub type CancelToken = watch::Receiver<bool>;

#[must_use]
pub fn new_cancel_pair() -> (watch::Sender<bool>, CancelToken) {
    watch::channel(false)
}

fn is_cancelled(token: &CancelToken) -> bool {
    *token.borrow()
}

/// Compute the backoff delay for a 1-indexed attempt number.
#[must_use]
pub fn backoff_delay_ms(strategy: crate::domain::models::BackoffStrategy, base_delay_ms: u64, attempt: u32, jitter: bool) -> u64 {
    use crate::domain::models::BackoffStrategy::{Exponential, Linear};
    let raw = match strategy {
        Linear => base_delay_ms.saturating_mul(u64::from(attempt)),
        Exponential => base_delay_ms.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(32)),
    };
    let capped = raw.min(MAX_BACKOFF_MS);
    if jitter {
        let jitter_amount = (capped as f64 * 0.1) as i64;
        if jitter_amount == 0 {
            capped
        } else {
            let delta = rand::thread_rng().gen_range(-jitter_amount..=jitter_amount);
            (capped as i64 + delta).max(0) as u64
        }
    } else {
        capped
    }
}

pub struct StepExecutor<'a> {
    pub registry: &'a ActionRegistry,
    pub default_timeout_ms: u64,
    pub execution_id: Uuid,
    pub workflow_name: String,
}

impl<'a> StepExecutor<'a> {
    /// Run the full five-step algorithm from spec §4.8.
    pub async fn execute(&self, step: &Step, scope: &ResolutionScope, cancel: &CancelToken) -> StepOutcome {
        // Step 1: `when` guard.
        if let Some(when) = &step.when {
            match resolve(&Value::String(when.clone()), scope) {
                Ok(v) if !v.is_truthy() => {
                    return StepOutcome { status: StepStatus::Skipped, attempts: 0, output: None, error: None, history: Vec::new() };
                }
                Err(e) => {
                    return StepOutcome { status: StepStatus::Failed, attempts: 0, output: None, error: Some(e), history: Vec::new() };
                }
                Ok(_) => {}
            }
        }

        let max_attempts = step.retry.as_ref().map_or(1, |r| r.max.max(1));
        let timeout_ms = step
            .timeout
            .as_deref()
            .and_then(crate::domain::models::parse_duration_ms)
            .unwrap_or(self.default_timeout_ms);

        let mut machine = StepStateMachine::new();
        let mut last_error: Option<EngineError> = None;

        for attempt in 1..=max_attempts {
            // Step 2: resolve `with` (re-resolved every attempt, spec §9 Open
            // Question (b): re-resolve-on-retry).
            let resolved_with = match resolve_with(&step.with, scope) {
                Ok(w) => w,
                Err(e) => return failed(machine, attempt.saturating_sub(1), e),
            };
            let resolved_env = match resolve_with(&step.env, scope) {
                Ok(w) => w,
                Err(e) => return failed(machine, attempt.saturating_sub(1), e),
            };

            // First attempt: Pending -> Running. Later attempts arrive
            // already in Retrying (set at the bottom of the previous
            // iteration) and move Retrying -> Running.
            let _ = machine.transition(StepStatus::Running, None);

            if is_cancelled(cancel) {
                let _ = machine.transition(StepStatus::Cancelled, Some("cancelled".to_string()));
                return StepOutcome { status: StepStatus::Cancelled, attempts: attempt, output: None, error: None, history: machine.history };
            }

            let ctx = ActionContext {
                workflow_name: self.workflow_name.clone(),
                step_id: step.id.clone(),
                execution_id: self.execution_id,
                secrets: scope.secrets.clone(),
                timeout_ms,
                env: resolved_env,
                step_outputs: scope.steps.clone(),
                inputs: scope.inputs.clone(),
                workflow_context: scope.context.clone(),
                temp_dir: std::env::temp_dir().join("orbyt").join(self.execution_id.to_string()).join(&step.id),
                cwd: std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from(".")),
                cancel_token: cancel.clone(),
            };

            let handler = match self.registry.resolve(&step.uses) {
                Ok(h) => h,
                Err(e) => return failed(machine, attempt, e),
            };

            let call = handler.execute(&step.uses, &resolved_with, &ctx);
            let race = tokio_timeout(Duration::from_millis(timeout_ms), call).await;

            match race {
                Err(_elapsed) => {
                    // Timeout is terminal for the step, never retried.
                    let _ = machine.transition(StepStatus::Timeout, Some("timed out".to_string()));
                    let error = crate::domain::error::EngineError::new(
                        crate::domain::error::ErrorCategory::Execution,
                        "TIMEOUT",
                        crate::domain::error::ErrorSeverity::Medium,
                        format!("step '{}' exceeded timeout of {timeout_ms}ms", step.id),
                    );
                    return StepOutcome { status: StepStatus::Timeout, attempts: attempt, output: None, error: Some(error), history: machine.history };
                }
                Ok(result) if result.success => {
                    let _ = machine.transition(StepStatus::Success, None);
                    let mapped = map_outputs(&step.outputs, &result.output);
                    return StepOutcome { status: StepStatus::Success, attempts: attempt, output: Some(mapped), error: None, history: machine.history };
                }
                Ok(result) => {
                    let mut error = result.error.unwrap_or_else(|| {
                        crate::domain::error::EngineError::classify_exception("action handler returned failure with no error detail")
                    });
                    if !error.message.starts_with(&step.id) {
                        error.message = format!("{}: {}", step.id, error.message);
                    }
                    let retryable = crate::domain::error::EngineError::is_retryable(&error.code);
                    let _ = machine.transition(StepStatus::Failed, Some(error.message.clone()));
                    last_error = Some(error);
                    if retryable && attempt < max_attempts {
                        let _ = machine.transition(StepStatus::Retrying, None);
                        if let Some(retry) = &step.retry {
                            let base_ms = crate::domain::models::parse_duration_ms(&retry.delay).unwrap_or(0);
                            let delay = backoff_delay_ms(retry.backoff, base_ms, attempt, true);
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                        }
                        continue;
                    }
                    return StepOutcome { status: StepStatus::Failed, attempts: attempt, output: None, error: last_error, history: machine.history };
                }
            }
        }

        StepOutcome { status: StepStatus::Failed, attempts: max_attempts, output: None, error: last_error, history: machine.history }
    }
}

fn failed(machine: StepStateMachine, attempts: u32, error: EngineError) -> StepOutcome {
    StepOutcome { status: StepStatus::Failed, attempts, output: None, error: Some(error), history: machine.history }
}

fn resolve_with(map: &BTreeMap<String, Value>, scope: &ResolutionScope) -> Result<BTreeMap<String, Value>, EngineError> {
    map.iter().map(|(k, v)| Ok((k.clone(), resolve(v, scope)?))).collect()
}

/// Map the raw action result through each `alias -> dotted-path`
/// (undefined-safe: a missing path yields `Null`, never an error).
fn map_outputs(outputs: &BTreeMap<String, String>, raw: &Value) -> Value {
    if outputs.is_empty() {
        return raw.clone();
    }
    let mapped = outputs
        .iter()
        .map(|(alias, path)| (alias.clone(), raw.get_path(path).cloned().unwrap_or(Value::Null)))
        .collect();
    Value::Mapping(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{BackoffStrategy, RetryPolicy};
    use crate::services::builtin_actions::{EchoHandler, FailHandler, NoopHandler, SleepHandler};
    use std::sync::Arc;

    fn registry() -> ActionRegistry {
        let mut r = ActionRegistry::new();
        r.register(Arc::new(NoopHandler));
        r.register(Arc::new(EchoHandler));
        r.register(Arc::new(FailHandler));
        r.register(Arc::new(SleepHandler));
        r
    }

    fn base_step(id: &str, uses: &str) -> Step {
        Step {
            id: id.to_string(),
            name: None,
            uses: uses.to_string(),
            with: BTreeMap::new(),
            needs: vec![],
            when: None,
            timeout: None,
            retry: None,
            continue_on_error: false,
            outputs: BTreeMap::new(),
            env: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn noop_step_succeeds_on_first_attempt() {
        let registry = registry();
        let executor = StepExecutor { registry: &registry, default_timeout_ms: 1000, execution_id: Uuid::new_v4(), workflow_name: "wf".into() };
        let (_tx, cancel) = new_cancel_pair();
        let outcome = executor.execute(&base_step("a", "noop"), &ResolutionScope::default(), &cancel).await;
        assert_eq!(outcome.status, StepStatus::Success);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn when_false_skips_without_invoking_handler() {
        let registry = registry();
        let executor = StepExecutor { registry: &registry, default_timeout_ms: 1000, execution_id: Uuid::new_v4(), workflow_name: "wf".into() };
        let (_tx, cancel) = new_cancel_pair();
        let mut step = base_step("a", "noop");
        step.when = Some("${'false'}".to_string());
        let outcome = executor.execute(&step, &ResolutionScope::default(), &cancel).await;
        assert_eq!(outcome.status, StepStatus::Skipped);
        assert_eq!(outcome.attempts, 0);
    }

    #[tokio::test]
    async fn retryable_failure_exhausts_configured_max() {
        let registry = registry();
        let executor = StepExecutor { registry: &registry, default_timeout_ms: 1000, execution_id: Uuid::new_v4(), workflow_name: "wf".into() };
        let (_tx, cancel) = new_cancel_pair();
        let mut step = base_step("a", "fail");
        step.with.insert("code".to_string(), Value::String("ORB-E-ADAPTER_ERROR".into()));
        step.retry = Some(RetryPolicy { max: 3, backoff: BackoffStrategy::Linear, delay: "1ms".into() });
        let outcome = executor.execute(&step, &ResolutionScope::default(), &cancel).await;
        assert_eq!(outcome.status, StepStatus::Failed);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_stops_at_one_attempt() {
        let registry = registry();
        let executor = StepExecutor { registry: &registry, default_timeout_ms: 1000, execution_id: Uuid::new_v4(), workflow_name: "wf".into() };
        let (_tx, cancel) = new_cancel_pair();
        let mut step = base_step("a", "fail");
        step.with.insert("code".to_string(), Value::String("ORB-V-SOMETHING".into()));
        step.retry = Some(RetryPolicy { max: 5, backoff: BackoffStrategy::Linear, delay: "1ms".into() });
        let outcome = executor.execute(&step, &ResolutionScope::default(), &cancel).await;
        assert_eq!(outcome.status, StepStatus::Failed);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn timeout_is_terminal_with_no_retry() {
        let registry = registry();
        let executor = StepExecutor { registry: &registry, default_timeout_ms: 1000, execution_id: Uuid::new_v4(), workflow_name: "wf".into() };
        let (_tx, cancel) = new_cancel_pair();
        let mut step = base_step("a", "sleep");
        step.with.insert("ms".to_string(), Value::Number(200.0));
        step.timeout = Some("50ms".to_string());
        step.retry = Some(RetryPolicy { max: 3, backoff: BackoffStrategy::Linear, delay: "1ms".into() });
        let outcome = executor.execute(&step, &ResolutionScope::default(), &cancel).await;
        assert_eq!(outcome.status, StepStatus::Timeout);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn outputs_are_mapped_through_alias_paths() {
        let registry = registry();
        let executor = StepExecutor { registry: &registry, default_timeout_ms: 1000, execution_id: Uuid::new_v4(), workflow_name: "wf".into() };
        let (_tx, cancel) = new_cancel_pair();
        let mut step = base_step("a", "echo");
        step.with.insert("x".to_string(), Value::Number(42.0));
        step.outputs.insert("value".to_string(), "x".to_string());
        let outcome = executor.execute(&step, &ResolutionScope::default(), &cancel).await;
        assert_eq!(outcome.status, StepStatus::Success);
        assert_eq!(outcome.output.unwrap().get_path("value"), Some(&Value::Number(42.0)));
    }

    #[test]
    fn backoff_formulas_match_spec() {
        assert_eq!(backoff_delay_ms(BackoffStrategy::Linear, 10, 1, false), 10);
        assert_eq!(backoff_delay_ms(BackoffStrategy::Linear, 10, 3, false), 30);
        assert_eq!(backoff_delay_ms(BackoffStrategy::Exponential, 10, 1, false), 10);
        assert_eq!(backoff_delay_ms(BackoffStrategy::Exponential, 10, 3, false), 40);
        assert_eq!(backoff_delay_ms(BackoffStrategy::Exponential, 1000, 10, false), 30_000);
    }
}
