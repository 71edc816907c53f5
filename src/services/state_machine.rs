//! State machines (C6): the executor never mutates status directly, it
//! goes through these, making illegal histories unrepresentable.

use crate::domain::error::{EngineError, ErrorCategory, ErrorSeverity};
use crate::domain::models::{StepStatus, TransitionRecord, WorkflowStatus};
use chrono::Utc;

/// Drives a single step's status, keeping an append-only transition history.
#[derive(Debug, Clone)]
pub struct StepStateMachine {
    pub status: StepStatus,
    pub history: Vec<TransitionRecord<StepStatus>>,
}

impl StepStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self { status: StepStatus::Pending, history: Vec::new() }
    }

    /// Attempt a transition; rejects anything not in the table, and rejects
    /// all transitions once in a terminal state.
    pub fn transition(&mut self, to: StepStatus, reason: Option<String>) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(illegal_step_transition(self.status, to));
        }
        if !self.status.can_transition_to(to) {
            return Err(illegal_step_transition(self.status, to));
        }
        self.history.push(TransitionRecord { from: self.status, to, timestamp: Utc::now(), reason });
        self.status = to;
        Ok(())
    }
}

impl Default for StepStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn illegal_step_transition(from: StepStatus, to: StepStatus) -> EngineError {
    EngineError::new(
        ErrorCategory::Runtime,
        "ILLEGAL_STEP_TRANSITION",
        ErrorSeverity::Error,
        format!("illegal step transition {from:?} -> {to:?}"),
    )
}

/// Drives a workflow's status, keeping an append-only transition history.
#[derive(Debug, Clone)]
pub struct WorkflowStateMachine {
    pub status: WorkflowStatus,
    pub history: Vec<TransitionRecord<WorkflowStatus>>,
}

impl WorkflowStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self { status: WorkflowStatus::Queued, history: Vec::new() }
    }

    pub fn transition(&mut self, to: WorkflowStatus, reason: Option<String>) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(illegal_workflow_transition(self.status, to));
        }
        if !self.status.can_transition_to(to) {
            return Err(illegal_workflow_transition(self.status, to));
        }
        self.history.push(TransitionRecord { from: self.status, to, timestamp: Utc::now(), reason });
        self.status = to;
        Ok(())
    }
}

impl Default for WorkflowStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn illegal_workflow_transition(from: WorkflowStatus, to: WorkflowStatus) -> EngineError {
    EngineError::new(
        ErrorCategory::Runtime,
        "ILLEGAL_WORKFLOW_TRANSITION",
        ErrorSeverity::Error,
        format!("illegal workflow transition {from:?} -> {to:?}"),
    )
}
