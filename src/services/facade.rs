//! Planner Façade (C13): the engine's single public entry point.
//!
//! Wires the validator, state store, event bus, and workflow executor
//! behind four operations (`load_and_validate`, `run`, `explain`,
//! `validate`). Grounded on the teacher's top-level `Orchestrator`/service
//! composition pattern: one struct owning shared infrastructure, exposed
//! through a small number of high-level methods rather than handing callers
//! the individual services directly.

use crate::domain::error::EngineError;
use crate::domain::models::{ResolutionScope, RunNamespace, ValidatedPlan, WorkflowDefinition, WorkflowMetadata, WorkflowNamespace};
use crate::domain::value::Value;
use crate::services::action_registry::ActionRegistry;
use crate::services::builtin_actions::{EchoHandler, FailHandler, NoopHandler, SleepHandler};
use crate::services::event_bus::EventBus;
use crate::services::explain::{explain as run_explain, Explanation};
use crate::services::state_store::ExecutionStateStore;
use crate::services::validator::WorkflowValidator;
use crate::services::workflow_executor::{RunOptions, WorkflowExecutor, WorkflowResult};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Options a caller passes to `Engine::run`, distinct from the workflow
/// document itself (spec §6 "Execution options").
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub inputs: BTreeMap<String, Value>,
    pub secrets: BTreeMap<String, Value>,
    pub env: BTreeMap<String, Value>,
    /// Caller-supplied free-form context, sanitized key-by-key before merge.
    pub context: BTreeMap<String, Value>,
    pub triggered_by: Option<String>,
    pub workflow_timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
}

/// The result of `Engine::validate`: never raises, always reports.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<EngineError>,
}

/// Engine-injected execution context, addressed only by the engine itself
/// under `scope.metadata`, never by a key a workflow author could write
/// (spec §4.11, §9 "prototype pollution" design note).
fn internal_execution_context(execution_id: Uuid) -> BTreeMap<String, Value> {
    let mut metadata = BTreeMap::new();
    metadata.insert("identity".to_string(), Value::String(execution_id.to_string()));
    metadata.insert("ownership".to_string(), Value::Null);
    metadata.insert("billing".to_string(), Value::Null);
    metadata.insert("usage".to_string(), Value::Null);
    metadata.insert("audit".to_string(), Value::Null);
    metadata
}

/// The engine's entry point, owning the shared action registry, event bus,
/// and execution state store. Cheap to clone: every field is an `Arc`.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<ActionRegistry>,
    event_bus: Arc<EventBus>,
    state_store: Arc<ExecutionStateStore>,
    default_timeout_ms: u64,
    default_concurrency: usize,
}

impl Engine {
    /// Builds an engine with the built-in test/demo handlers registered.
    /// A real embedding registers additional handlers via `register`.
    #[must_use]
    pub fn new(default_timeout_ms: u64, default_concurrency: usize, event_bus_capacity: usize) -> Self {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(NoopHandler));
        registry.register(Arc::new(EchoHandler));
        registry.register(Arc::new(SleepHandler));
        registry.register(Arc::new(FailHandler));
        Self {
            registry: Arc::new(registry),
            event_bus: Arc::new(EventBus::new(event_bus_capacity)),
            state_store: Arc::new(ExecutionStateStore::new()),
            default_timeout_ms,
            default_concurrency,
        }
    }

    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    #[must_use]
    pub fn state_store(&self) -> &ExecutionStateStore {
        &self.state_store
    }

    /// Run the Workflow Validator, Dependency Graph, Cycle Detector, and
    /// Topological Planner over a raw `WorkflowDefinition`, producing an
    /// immutable `ValidatedPlan` or the collected validation errors.
    pub fn load_and_validate(&self, workflow: WorkflowDefinition) -> Result<ValidatedPlan, Vec<EngineError>> {
        WorkflowValidator::new(&self.registry).validate(workflow)
    }

    /// Validate only, never raising: reports `{valid, errors}` (spec §6).
    #[must_use]
    pub fn validate(&self, workflow: WorkflowDefinition) -> ValidationReport {
        match self.load_and_validate(workflow) {
            Ok(_) => ValidationReport { valid: true, errors: Vec::new() },
            Err(errors) => ValidationReport { valid: false, errors },
        }
    }

    /// Dry-run report: what would happen, without executing anything.
    #[must_use]
    pub fn explain(&self, plan: &ValidatedPlan) -> Explanation {
        run_explain(plan, &BTreeMap::new())
    }

    /// Validate (if given a raw definition) and run a workflow end to end.
    pub async fn run(&self, workflow: WorkflowDefinition, options: ExecutionOptions) -> Result<WorkflowResult, Vec<EngineError>> {
        let plan = self.load_and_validate(workflow)?;
        Ok(self.run_plan(plan, options).await)
    }

    /// Run an already-validated plan (skips re-validation, e.g. after a
    /// caller has separately called `load_and_validate` or `explain`).
    pub async fn run_plan(&self, plan: ValidatedPlan, options: ExecutionOptions) -> WorkflowResult {
        let execution_id = Uuid::new_v4();
        let metadata = &plan.workflow.metadata;

        let mut scope = ResolutionScope {
            env: options.env,
            steps: BTreeMap::new(),
            workflow: Some(workflow_namespace(metadata, &plan.workflow.version)),
            run: Some(RunNamespace { id: execution_id, timestamp: Utc::now(), attempt: 1, triggered_by: options.triggered_by }),
            inputs: merge_input_defaults(&plan.workflow.inputs, options.inputs),
            secrets: options.secrets,
            metadata: internal_execution_context(execution_id),
            context: BTreeMap::new(),
        };
        scope.merge_caller_context(options.context);

        crate::infrastructure::logging::global_registry().register_scope(&scope.secrets);

        let executor = WorkflowExecutor {
            registry: self.registry.as_ref(),
            state_store: self.state_store.as_ref(),
            event_bus: self.event_bus.as_ref(),
            default_timeout_ms: self.default_timeout_ms,
            default_concurrency: self.default_concurrency,
        };

        executor
            .run(plan, scope, RunOptions { workflow_timeout_ms: options.workflow_timeout_ms, concurrency: options.concurrency })
            .await
    }
}

fn workflow_namespace(metadata: &WorkflowMetadata, version: &str) -> WorkflowNamespace {
    WorkflowNamespace {
        id: Uuid::new_v4().to_string(),
        name: metadata.name.clone().unwrap_or_else(|| "unnamed".to_string()),
        version: metadata.version.clone().or_else(|| Some(version.to_string())),
        description: metadata.description.clone(),
        tags: metadata.tags.clone(),
        owner: metadata.owner.clone(),
    }
}

/// Fill in declared-default values for any input the caller did not supply.
fn merge_input_defaults(specs: &BTreeMap<String, crate::domain::models::InputSpec>, mut supplied: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    for (name, spec) in specs {
        if !supplied.contains_key(name) {
            if let Some(default) = &spec.default {
                supplied.insert(name.clone(), default.clone());
            }
        }
    }
    supplied
}
