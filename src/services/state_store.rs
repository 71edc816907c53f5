//! Execution State Store (C7).
//!
//! Keyed by `executionId`. The only shared mutable structure in the system
//! (spec §5); concurrent step completions inside a phase are serialized
//! here via a `tokio::sync::RwLock`, single-writer discipline enforced by
//! convention (only the Workflow Executor calls the mutating methods).

use crate::domain::error::EngineError;
use crate::domain::models::{AggregateCounters, ExecutionRecord, StepStateEntry, StepStatus, WorkflowStatus};
use crate::domain::value::Value;
use crate::services::state_machine::{StepStateMachine, WorkflowStateMachine};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

struct Entry {
    record: ExecutionRecord,
    workflow_machine: WorkflowStateMachine,
    step_machines: HashMap<String, StepStateMachine>,
}

/// In-memory store of `ExecutionRecord`s, one per execution id.
#[derive(Clone, Default)]
pub struct ExecutionStateStore {
    inner: Arc<RwLock<HashMap<Uuid, Entry>>>,
}

impl ExecutionStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn init(&self, record: ExecutionRecord) {
        let execution_id = record.execution_id;
        let step_machines = record.plan.workflow.steps.iter().map(|s| (s.id.clone(), StepStateMachine::new())).collect();
        let mut guard = self.inner.write().await;
        guard.insert(execution_id, Entry { record, workflow_machine: WorkflowStateMachine::new(), step_machines });
    }

    pub async fn update_workflow(&self, execution_id: Uuid, status: WorkflowStatus, error: Option<EngineError>) -> Result<(), EngineError> {
        let mut guard = self.inner.write().await;
        let entry = guard.get_mut(&execution_id).expect("execution must be initialized");
        entry.workflow_machine.transition(status, error.as_ref().map(|e| e.message.clone()))?;
        entry.record.workflow_status = status;
        if entry.record.started_at.is_none() && status == WorkflowStatus::Running {
            entry.record.started_at = Some(Utc::now());
        }
        if status.is_terminal() && entry.record.completed_at.is_none() {
            entry.record.completed_at = Some(Utc::now());
        }
        if error.is_some() {
            entry.record.workflow_error = error;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update_step(
        &self,
        execution_id: Uuid,
        step_id: &str,
        status: StepStatus,
        error: Option<EngineError>,
        output: Option<Value>,
        attempt_increment: bool,
    ) -> Result<(), EngineError> {
        let mut guard = self.inner.write().await;
        let entry = guard.get_mut(&execution_id).expect("execution must be initialized");
        let machine = entry.step_machines.get_mut(step_id).expect("unknown step id");
        machine.transition(status, error.as_ref().map(|e| e.message.clone()))?;

        let now = Utc::now();
        let state = entry.record.steps.entry(step_id.to_string()).or_insert_with(|| StepStateEntry::new(now));
        if attempt_increment {
            state.attempts += 1;
        }
        if state.start_time.is_none() && status == StepStatus::Running {
            state.start_time = Some(now);
        }
        if status.is_terminal() && state.end_time.is_none() {
            state.end_time = Some(now);
            if let Some(start) = state.start_time {
                state.duration_ms = Some((now - start).num_milliseconds());
            }
        }
        state.status = status;
        state.updated_at = now;
        if error.is_some() {
            state.error = error;
        }
        if output.is_some() {
            state.output = output;
        }

        entry.record.recompute_counters();
        Ok(())
    }

    pub async fn is_step_terminal(&self, execution_id: Uuid, step_id: &str) -> bool {
        let guard = self.inner.read().await;
        guard
            .get(&execution_id)
            .and_then(|e| e.record.steps.get(step_id))
            .is_some_and(|s| s.status.is_terminal())
    }

    pub async fn is_step_success(&self, execution_id: Uuid, step_id: &str) -> bool {
        let guard = self.inner.read().await;
        guard
            .get(&execution_id)
            .and_then(|e| e.record.steps.get(step_id))
            .is_some_and(|s| s.status.is_success())
    }

    pub async fn failed_steps(&self, execution_id: Uuid) -> Vec<String> {
        let guard = self.inner.read().await;
        guard.get(&execution_id).map(|e| e.record.failed_step_ids()).unwrap_or_default()
    }

    pub async fn completed_steps(&self, execution_id: Uuid) -> Vec<String> {
        let guard = self.inner.read().await;
        guard.get(&execution_id).map(|e| e.record.completed_step_ids()).unwrap_or_default()
    }

    pub async fn counters(&self, execution_id: Uuid) -> AggregateCounters {
        let guard = self.inner.read().await;
        guard.get(&execution_id).map(|e| e.record.counters).unwrap_or_default()
    }

    pub async fn execution_ids(&self) -> Vec<Uuid> {
        let guard = self.inner.read().await;
        guard.keys().copied().collect()
    }

    pub async fn snapshot(&self, execution_id: Uuid) -> Option<ExecutionRecord> {
        let guard = self.inner.read().await;
        guard.get(&execution_id).map(|e| e.record.clone())
    }

    pub async fn record_step_output(&self, execution_id: Uuid, step_id: &str, value: Value) {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.get_mut(&execution_id) {
            entry.record.scope.record_step_output(step_id, value);
        }
    }

    pub async fn scope_snapshot(&self, execution_id: Uuid) -> Option<crate::domain::models::ResolutionScope> {
        let guard = self.inner.read().await;
        guard.get(&execution_id).map(|e| e.record.scope.clone())
    }
}
