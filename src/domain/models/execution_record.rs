//! `ExecutionRecord` — the mutable per-execution state (spec §3, §4.5).
//!
//! Owned exclusively by the Workflow Executor; other components read it
//! only through `services::state_store::ExecutionStateStore`.

use super::plan::ValidatedPlan;
use super::scope::ResolutionScope;
use super::state::{StepStatus, WorkflowStatus};
use crate::domain::error::EngineError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Per-step mutable state entry.
#[derive(Debug, Clone)]
pub struct StepStateEntry {
    pub status: StepStatus,
    pub attempts: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<EngineError>,
    pub output: Option<crate::domain::value::Value>,
    pub updated_at: DateTime<Utc>,
}

impl StepStateEntry {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: StepStatus::Pending,
            attempts: 0,
            start_time: None,
            end_time: None,
            duration_ms: None,
            error: None,
            output: None,
            updated_at: now,
        }
    }
}

/// Aggregate counters recomputed on every step transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateCounters {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// The mutable, per-execution record keyed by `executionId`.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub execution_id: Uuid,
    pub plan: ValidatedPlan,
    pub workflow_status: WorkflowStatus,
    pub steps: BTreeMap<String, StepStateEntry>,
    pub counters: AggregateCounters,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub scope: ResolutionScope,
    pub failure_step: Option<String>,
    pub workflow_error: Option<EngineError>,
}

impl ExecutionRecord {
    #[must_use]
    pub fn new(execution_id: Uuid, plan: ValidatedPlan, scope: ResolutionScope, now: DateTime<Utc>) -> Self {
        let steps = plan
            .workflow
            .steps
            .iter()
            .map(|s| (s.id.clone(), StepStateEntry::new(now)))
            .collect::<BTreeMap<_, _>>();
        let total = steps.len();
        Self {
            execution_id,
            plan,
            workflow_status: WorkflowStatus::Queued,
            steps,
            counters: AggregateCounters { total, ..Default::default() },
            started_at: None,
            completed_at: None,
            scope,
            failure_step: None,
            workflow_error: None,
        }
    }

    pub fn recompute_counters(&mut self) {
        let mut c = AggregateCounters { total: self.steps.len(), ..Default::default() };
        for entry in self.steps.values() {
            match entry.status {
                StepStatus::Success => c.completed += 1,
                StepStatus::Failed | StepStatus::Timeout | StepStatus::Cancelled => c.failed += 1,
                StepStatus::Skipped => c.skipped += 1,
                _ => {}
            }
        }
        self.counters = c;
    }

    #[must_use]
    pub fn failed_step_ids(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|(_, e)| matches!(e.status, StepStatus::Failed | StepStatus::Timeout))
            .map(|(id, _)| id.clone())
            .collect()
    }

    #[must_use]
    pub fn completed_step_ids(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|(_, e)| e.status.is_success())
            .map(|(id, _)| id.clone())
            .collect()
    }

    #[must_use]
    pub fn all_terminal(&self) -> bool {
        self.steps.values().all(|e| e.status.is_terminal())
    }
}
