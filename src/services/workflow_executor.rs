//! Workflow Executor (C11): drives a `ValidatedPlan` phase by phase.
//!
//! Grounded on the teacher's `services::dag_executor::execute_wave`: each
//! phase's steps are launched concurrently behind an `Arc<Semaphore>`
//! permit per task, then joined with all-settled semantics (a single
//! step's failure never cancels its phase-mates). Cross-phase ordering is
//! strictly sequential, matching spec §5.

use crate::domain::error::{EngineError, ErrorCategory, ErrorSeverity};
use crate::domain::models::{
    ExecutionRecord, FailurePolicy, ResolutionScope, StepStatus, ValidatedPlan, WorkflowStatus,
};
use crate::domain::value::Value;
use crate::services::action_registry::ActionRegistry;
use crate::services::event_bus::{EventBus, EventKind};
use crate::services::state_store::ExecutionStateStore;
use crate::services::step_executor::{new_cancel_pair, CancelToken, StepExecutor};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use uuid::Uuid;

/// Per-execution options a caller (the façade) may override.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub workflow_timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
}

/// Aggregate metadata reported alongside the final status.
#[derive(Debug, Clone, Serialize)]
pub struct ResultMetadata {
    pub total_steps: usize,
    pub successful_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub phases: usize,
}

/// The caller-facing summary of one full execution (spec §6 "Result shape").
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub workflow_name: String,
    pub execution_id: Uuid,
    pub status: WorkflowStatus,
    pub step_results: BTreeMap<String, StepResultView>,
    pub duration_ms: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<EngineError>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResultView {
    pub status: StepStatus,
    pub attempts: u32,
    pub output: Option<Value>,
    pub error: Option<EngineError>,
}

pub struct WorkflowExecutor<'a> {
    pub registry: &'a ActionRegistry,
    pub state_store: &'a ExecutionStateStore,
    pub event_bus: &'a EventBus,
    pub default_timeout_ms: u64,
    pub default_concurrency: usize,
}

impl<'a> WorkflowExecutor<'a> {
    /// Run a validated plan to completion, driving every phase in order.
    pub async fn run(&self, plan: ValidatedPlan, mut scope: ResolutionScope, options: RunOptions) -> WorkflowResult {
        let execution_id = Uuid::new_v4();
        let workflow_name = plan.workflow.name().to_string();
        let total_steps = plan.workflow.steps.len();
        let phase_count = plan.phases.len();
        let failure_policy = plan.workflow.policies.failure;
        let concurrency = options
            .concurrency
            .or(plan.workflow.policies.concurrency)
            .unwrap_or(self.default_concurrency)
            .max(1);

        let record = ExecutionRecord::new(execution_id, plan.clone(), scope.clone(), Utc::now());
        self.state_store.init(record).await;

        self.event_bus.publish(EventKind::WorkflowStarted, execution_id, None, None);
        if let Err(e) = self.state_store.update_workflow(execution_id, WorkflowStatus::Running, None).await {
            return self.early_failure(execution_id, &workflow_name, total_steps, phase_count, e).await;
        }

        let (cancel_tx, cancel_rx) = new_cancel_pair();
        let timeout_ms = options.workflow_timeout_ms;
        let timeout_guard = timeout_ms.map(|ms| {
            let tx = cancel_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                let _ = tx.send(true);
            })
        });

        let mut fatal_error: Option<EngineError> = None;
        let mut failure_step: Option<String> = None;
        let mut timed_out = false;

        'phases: for phase in &plan.phases {
            let semaphore = Arc::new(Semaphore::new(concurrency.min(phase.step_ids.len().max(1))));
            let scope_arc = Arc::new(scope.clone());
            let mut handles = Vec::with_capacity(phase.step_ids.len());

            for step_id in &phase.step_ids {
                let step = plan.workflow.step(step_id).expect("planner only emits declared steps").clone();
                let semaphore = Arc::clone(&semaphore);
                let scope_arc = Arc::clone(&scope_arc);
                let cancel_rx = cancel_rx.clone();
                let registry = self.registry;
                let default_timeout_ms = self.default_timeout_ms;
                let workflow_name = workflow_name.clone();
                let step_id = step_id.clone();

                let lock_guard = registry.lock_for(&step.uses).await;

                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                    let _handler_lock = lock_guard;
                    let executor = StepExecutor { registry, default_timeout_ms, execution_id, workflow_name };
                    let outcome = executor.execute(&step, &scope_arc, &cancel_rx).await;
                    (step_id, outcome)
                }));
            }

            let mut any_fatal = false;
            for handle in handles {
                let (step_id, outcome) = match handle.await {
                    Ok(v) => v,
                    Err(join_err) => {
                        let err = EngineError::new(
                            ErrorCategory::Runtime,
                            "STEP_TASK_PANIC",
                            ErrorSeverity::Critical,
                            format!("step task failed to join: {join_err}"),
                        )
                        .with_source(join_err);
                        (String::new(), crate::services::step_executor::StepOutcome {
                            status: StepStatus::Failed,
                            attempts: 0,
                            output: None,
                            error: Some(err),
                            history: Vec::new(),
                        })
                    }
                };
                if step_id.is_empty() {
                    continue;
                }

                self.event_bus.publish(EventKind::StepStarted, execution_id, Some(step_id.clone()), None);
                let _ = self
                    .state_store
                    .update_step(execution_id, &step_id, StepStatus::Running, None, None, true)
                    .await;
                let _ = self
                    .state_store
                    .update_step(execution_id, &step_id, outcome.status, outcome.error.clone(), outcome.output.clone(), false)
                    .await;

                if let Some(output) = &outcome.output {
                    scope.record_step_output(step_id.clone(), output.clone());
                    self.state_store.record_step_output(execution_id, &step_id, output.clone()).await;
                }

                match outcome.status {
                    StepStatus::Success | StepStatus::Skipped => {
                        self.event_bus.publish(EventKind::StepCompleted, execution_id, Some(step_id.clone()), None);
                    }
                    StepStatus::Failed | StepStatus::Timeout | StepStatus::Cancelled => {
                        let message = outcome.error.as_ref().map(|e| e.message.clone());
                        self.event_bus.publish(EventKind::StepFailed, execution_id, Some(step_id.clone()), message);

                        let step_def = plan.workflow.step(&step_id);
                        let effective_continue = step_def.is_some_and(|s| s.continue_on_error) || failure_policy == FailurePolicy::Continue;
                        if !effective_continue {
                            any_fatal = true;
                            failure_step.get_or_insert_with(|| step_id.clone());
                            fatal_error = fatal_error.or(outcome.error);
                        }
                    }
                    _ => {}
                }
            }

            if *cancel_rx.borrow() {
                timed_out = timed_out || timeout_ms.is_some();
                break 'phases;
            }
            if any_fatal {
                let _ = cancel_tx.send(true);
                break 'phases;
            }
        }

        if let Some(guard) = timeout_guard {
            guard.abort();
        }

        let final_status = if timed_out {
            WorkflowStatus::Timeout
        } else if fatal_error.is_some() {
            WorkflowStatus::Failed
        } else {
            let counters = self.state_store.counters(execution_id).await;
            if counters.failed > 0 {
                WorkflowStatus::Partial
            } else {
                WorkflowStatus::Completed
            }
        };

        let workflow_error = if timed_out {
            Some(EngineError::new(
                ErrorCategory::Execution,
                "WORKFLOW_TIMEOUT",
                ErrorSeverity::Fatal,
                format!("workflow '{workflow_name}' exceeded its configured timeout"),
            ))
        } else {
            fatal_error.clone()
        };

        let _ = self.state_store.update_workflow(execution_id, final_status, workflow_error.clone()).await;
        match final_status {
            WorkflowStatus::Completed | WorkflowStatus::Partial => {
                self.event_bus.publish(EventKind::WorkflowCompleted, execution_id, None, None);
            }
            _ => {
                let message = workflow_error.as_ref().map(|e| e.message.clone());
                self.event_bus.publish(EventKind::WorkflowFailed, execution_id, None, message);
            }
        }

        self.build_result(execution_id, &workflow_name, total_steps, phase_count, final_status, workflow_error).await
    }

    async fn early_failure(&self, execution_id: Uuid, workflow_name: &str, total_steps: usize, phase_count: usize, error: EngineError) -> WorkflowResult {
        self.build_result(execution_id, workflow_name, total_steps, phase_count, WorkflowStatus::Failed, Some(error)).await
    }

    async fn build_result(
        &self,
        execution_id: Uuid,
        workflow_name: &str,
        total_steps: usize,
        phase_count: usize,
        status: WorkflowStatus,
        error: Option<EngineError>,
    ) -> WorkflowResult {
        let snapshot = self.state_store.snapshot(execution_id).await;
        let (step_results, started_at, completed_at, successful, failed, skipped) = match &snapshot {
            Some(record) => {
                let mut views = BTreeMap::new();
                let (mut s, mut f, mut sk) = (0, 0, 0);
                for (id, entry) in &record.steps {
                    match entry.status {
                        StepStatus::Success => s += 1,
                        StepStatus::Failed | StepStatus::Timeout | StepStatus::Cancelled => f += 1,
                        StepStatus::Skipped => sk += 1,
                        _ => {}
                    }
                    views.insert(
                        id.clone(),
                        StepResultView { status: entry.status, attempts: entry.attempts, output: entry.output.clone(), error: entry.error.clone() },
                    );
                }
                (views, record.started_at, record.completed_at, s, f, sk)
            }
            None => (BTreeMap::new(), None, None, 0, 0, 0),
        };

        let duration_ms = match (started_at, completed_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds(),
            _ => 0,
        };

        WorkflowResult {
            workflow_name: workflow_name.to_string(),
            execution_id,
            status,
            step_results,
            duration_ms,
            started_at,
            completed_at,
            error,
            metadata: ResultMetadata { total_steps, successful_steps: successful, failed_steps: failed, skipped_steps: skipped, phases: phase_count },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PoliciesBlock, Step, WorkflowDefinition, WorkflowMetadata};
    use crate::services::builtin_actions::{FailHandler, NoopHandler, SleepHandler};
    use std::sync::Arc as StdArc;

    fn step(id: &str, uses: &str, needs: &[&str]) -> Step {
        Step {
            id: id.to_string(),
            name: None,
            uses: uses.to_string(),
            with: BTreeMap::new(),
            needs: needs.iter().map(|s| s.to_string()).collect(),
            when: None,
            timeout: None,
            retry: None,
            continue_on_error: false,
            outputs: BTreeMap::new(),
            env: BTreeMap::new(),
        }
    }

    fn plan(steps: Vec<Step>) -> ValidatedPlan {
        let workflow = WorkflowDefinition {
            version: "1".into(),
            kind: "Workflow".into(),
            metadata: WorkflowMetadata { name: Some("demo".into()), ..Default::default() },
            inputs: Default::default(),
            secrets: Default::default(),
            context: Default::default(),
            defaults: Default::default(),
            policies: PoliciesBlock::default(),
            steps,
            outputs: Default::default(),
        };
        let validator_registry = ActionRegistry::new();
        crate::services::validator::WorkflowValidator::new(&validator_registry);
        let graph = crate::services::graph::build_graph(&workflow).unwrap();
        let (phases, step_phase) = crate::services::planner::plan_phases(&graph).unwrap();
        ValidatedPlan { workflow, graph, phases, step_phase, critical_path: Vec::new(), slack: Default::default() }
    }

    fn registry() -> ActionRegistry {
        let mut r = ActionRegistry::new();
        r.register(StdArc::new(NoopHandler));
        r.register(StdArc::new(FailHandler));
        r.register(StdArc::new(SleepHandler));
        r
    }

    #[tokio::test]
    async fn linear_workflow_completes_successfully() {
        let registry = registry();
        let state_store = ExecutionStateStore::new();
        let event_bus = EventBus::new(64);
        let executor = WorkflowExecutor { registry: &registry, state_store: &state_store, event_bus: &event_bus, default_timeout_ms: 5000, default_concurrency: 4 };
        let p = plan(vec![step("a", "noop", &[]), step("b", "noop", &["a"])]);
        let result = executor.run(p, ResolutionScope::default(), RunOptions::default()).await;
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(result.metadata.successful_steps, 2);
    }

    #[tokio::test]
    async fn fatal_step_failure_stops_later_phases() {
        let registry = registry();
        let state_store = ExecutionStateStore::new();
        let event_bus = EventBus::new(64);
        let executor = WorkflowExecutor { registry: &registry, state_store: &state_store, event_bus: &event_bus, default_timeout_ms: 5000, default_concurrency: 4 };
        let mut a = step("a", "fail", &[]);
        a.with.insert("code".to_string(), Value::String("ORB-E-ADAPTER_ERROR".into()));
        let p = plan(vec![a, step("b", "noop", &["a"])]);
        let result = executor.run(p, ResolutionScope::default(), RunOptions::default()).await;
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert!(!result.step_results.contains_key("b") || matches!(result.step_results["b"].status, StepStatus::Pending));
    }

    #[tokio::test]
    async fn continue_on_error_allows_later_phases_to_run() {
        let registry = registry();
        let state_store = ExecutionStateStore::new();
        let event_bus = EventBus::new(64);
        let executor = WorkflowExecutor { registry: &registry, state_store: &state_store, event_bus: &event_bus, default_timeout_ms: 5000, default_concurrency: 4 };
        let mut a = step("a", "fail", &[]);
        a.continue_on_error = true;
        a.with.insert("code".to_string(), Value::String("ORB-E-ADAPTER_ERROR".into()));
        let p = plan(vec![a, step("b", "noop", &["a"])]);
        let result = executor.run(p, ResolutionScope::default(), RunOptions::default()).await;
        assert_eq!(result.status, WorkflowStatus::Partial);
        assert_eq!(result.step_results["b"].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn independent_phase_steps_run_concurrently() {
        let registry = registry();
        let state_store = ExecutionStateStore::new();
        let event_bus = EventBus::new(64);
        let executor = WorkflowExecutor { registry: &registry, state_store: &state_store, event_bus: &event_bus, default_timeout_ms: 5000, default_concurrency: 4 };
        let mut a = step("a", "sleep", &[]);
        a.with.insert("ms".to_string(), Value::Number(50.0));
        let mut b = step("b", "sleep", &[]);
        b.with.insert("ms".to_string(), Value::Number(50.0));
        let p = plan(vec![a, b]);
        let start = Instant::now();
        let result = executor.run(p, ResolutionScope::default(), RunOptions::default()).await;
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert!(start.elapsed().as_millis() < 150);
    }
}
