//! Orbyt — a declarative workflow execution engine.
//!
//! Given a validated workflow document (a DAG of named steps), Orbyt plans
//! execution phases, resolves `${...}` variable expressions against a typed
//! scope, and drives each phase's steps through retry/backoff/timeout policy
//! to a terminal result — emitting lifecycle events and an execution record
//! along the way.
//!
//! The crate is a kernel, not a platform: it consumes already-parsed
//! workflow objects (no YAML/JSON front end), dispatches to action handlers
//! registered by the embedder (no built-in HTTP/shell/db providers beyond a
//! handful of test/demo handlers), and exposes everything through the
//! [`Engine`] façade in [`services::facade`].
//!
//! ```ignore
//! use orbyt::{Engine, ExecutionOptions};
//!
//! # async fn run(workflow: orbyt::WorkflowDefinition) {
//! let engine = Engine::new(30_000, 4, 1024);
//! let result = engine.run(workflow, ExecutionOptions::default()).await;
//! # }
//! ```

pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::error::{classify, control_for, EngineError, ErrorCategory, ErrorSeverity, ExecutionControl};
pub use domain::models::{
    DependencyGraph, ExecutionPhase, ExecutionRecord, ResolutionScope, Step, StepStatus,
    ValidatedPlan, WorkflowDefinition, WorkflowStatus,
};
pub use domain::value::Value;
pub use infrastructure::config::EngineConfig;
pub use services::event_bus::{Event, EventBus, EventKind};
pub use services::explain::Explanation;
pub use services::facade::{Engine, ExecutionOptions, ValidationReport};
pub use services::workflow_executor::WorkflowResult;
