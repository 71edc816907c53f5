//! Domain models
//!
//! Pure domain entities with no infrastructure concerns: the workflow
//! document, the dependency graph/plan, status state machines, the
//! resolution scope, and the mutable execution record.

pub mod execution_record;
pub mod plan;
pub mod scope;
pub mod state;
pub mod workflow_def;

pub use execution_record::{AggregateCounters, ExecutionRecord, StepStateEntry};
pub use plan::{DependencyGraph, ExecutionPhase, SlackEntry, ValidatedPlan};
pub use scope::{is_reserved_key, ReservedNamespace, ResolutionScope, RunNamespace, WorkflowNamespace};
pub use state::{StepStatus, TransitionRecord, WorkflowStatus};
pub use workflow_def::{
    is_valid_id, parse_duration_ms, BackoffStrategy, DefaultsBlock, FailurePolicy, InputSpec,
    PoliciesBlock, RetryPolicy, SandboxLevel, SecretsSpec, Step, WorkflowDefinition, WorkflowMetadata,
};
