//! Workflow Validator (C9): four phases, stopping at first error only
//! within a phase — later phases may collect multiple errors.

use crate::domain::error::{EngineError, ErrorCategory, ErrorSeverity};
use crate::domain::models::{is_valid_id, parse_duration_ms, ValidatedPlan, WorkflowDefinition};
use crate::services::action_registry::ActionRegistry;
use crate::services::cycle::detect_cycle;
use crate::services::graph::build_graph;
use crate::services::planner::plan_phases;
use crate::services::resolver::validate_forward_references;
use std::collections::BTreeMap;

/// Field names recognized inside a step object; used for typo suggestions
/// and the reserved-field sweep.
const STEP_FIELDS: &[&str] = &["id", "uses", "name", "with", "when", "needs", "retry", "timeout", "continueOnError", "outputs", "env"];

pub struct WorkflowValidator<'a> {
    registry: &'a ActionRegistry,
}

impl<'a> WorkflowValidator<'a> {
    #[must_use]
    pub fn new(registry: &'a ActionRegistry) -> Self {
        Self { registry }
    }

    /// Run the full four-phase pipeline, producing an immutable
    /// `ValidatedPlan` or the first (or several, for later phases)
    /// structured errors.
    pub fn validate(&self, workflow: WorkflowDefinition) -> Result<ValidatedPlan, Vec<EngineError>> {
        self.check_reserved_fields(&workflow).map_err(|e| vec![e])?;
        self.check_shape(&workflow).map_err(|e| vec![e])?;

        let step_errors = self.check_steps(&workflow);
        if !step_errors.is_empty() {
            return Err(step_errors);
        }

        let graph = build_graph(&workflow).map_err(|e| vec![e])?;
        if let Some(cycle) = detect_cycle(&graph) {
            return Err(vec![EngineError::new(
                ErrorCategory::Validation,
                "CIRCULAR_DEPENDENCY",
                ErrorSeverity::Fatal,
                format!("circular dependency detected: {}", cycle.join(" -> ")),
            )
            .with_hint("remove the cyclic `needs` edge")]);
        }

        let (phases, step_phase) = plan_phases(&graph).map_err(|e| vec![e])?;
        let critical_path = phases.last().map_or(0, |p| p.index) + 1;
        let _ = critical_path;

        Ok(ValidatedPlan {
            workflow,
            graph,
            phases,
            step_phase,
            critical_path: Vec::new(),
            slack: BTreeMap::new(),
        })
    }

    /// Phase 1: security / reserved fields. Any top-level or nested key
    /// starting with `_`, or matching the reserved prefix/name set.
    fn check_reserved_fields(&self, workflow: &WorkflowDefinition) -> Result<(), EngineError> {
        for step in &workflow.steps {
            for key in step.with.keys().chain(step.env.keys()) {
                if crate::domain::models::is_reserved_key(key) {
                    return Err(self.permission_denied(key, &format!("workflow.steps[{}]", step.id)));
                }
            }
        }
        for key in workflow.context.keys() {
            if crate::domain::models::is_reserved_key(key) {
                return Err(self.permission_denied(key, "workflow.context"));
            }
        }
        Ok(())
    }

    fn permission_denied(&self, key: &str, location: &str) -> EngineError {
        let field_type = infer_field_type(key);
        EngineError::new(
            ErrorCategory::Runtime,
            "PERMISSION_DENIED",
            ErrorSeverity::Critical,
            format!("field '{key}' at {location} is reserved for internal use ({field_type})"),
        )
        .with_path(format!("{location}.{key}"))
        .with_hint("remove this field; it is injected by the engine itself")
    }

    /// Phase 2: shape. Required fields present, enums known, types match,
    /// id/duration patterns hold.
    fn check_shape(&self, workflow: &WorkflowDefinition) -> Result<(), EngineError> {
        if workflow.version.is_empty() {
            return Err(self.missing_field("version", "workflow"));
        }
        if workflow.kind.is_empty() {
            return Err(self.missing_field("kind", "workflow"));
        }
        if workflow.steps.is_empty() {
            return Err(EngineError::new(
                ErrorCategory::Validation,
                "EMPTY_WORKFLOW",
                ErrorSeverity::Error,
                "workflow.steps must contain at least one step",
            ));
        }
        for step in &workflow.steps {
            if !is_valid_id(&step.id) {
                return Err(EngineError::new(
                    ErrorCategory::Schema,
                    "INVALID_ID",
                    ErrorSeverity::Error,
                    format!("step id '{}' does not match ^[A-Za-z_][A-Za-z0-9_-]*$", step.id),
                )
                .with_path(format!("workflow.steps[{}].id", step.id)));
            }
            if let Some(timeout) = &step.timeout {
                if parse_duration_ms(timeout).is_none() {
                    return Err(EngineError::new(
                        ErrorCategory::Schema,
                        "INVALID_DURATION",
                        ErrorSeverity::Error,
                        format!("step '{}' has invalid timeout '{timeout}'", step.id),
                    )
                    .with_hint("durations match ^[0-9]+(ms|s|m|h)$"));
                }
            }
        }
        Ok(())
    }

    fn missing_field(&self, field: &str, location: &str) -> EngineError {
        EngineError::new(
            ErrorCategory::Schema,
            "MISSING_FIELD",
            ErrorSeverity::Error,
            format!("missing required field '{field}' at {location}"),
        )
        .with_path(format!("{location}.{field}"))
    }

    /// Phase 3: steps. Collects every violation rather than stopping at the
    /// first, since this phase may report multiple independent problems.
    fn check_steps(&self, workflow: &WorkflowDefinition) -> Vec<EngineError> {
        let mut errors = Vec::new();
        let mut seen_ids = std::collections::HashSet::new();

        for step in &workflow.steps {
            if !seen_ids.insert(step.id.clone()) {
                errors.push(
                    EngineError::new(
                        ErrorCategory::Validation,
                        "DUPLICATE_ID",
                        ErrorSeverity::Error,
                        format!("duplicate step id '{}'", step.id),
                    )
                    .with_path(format!("workflow.steps[{}]", step.id)),
                );
            }

            for dep in &step.needs {
                if workflow.step(dep).is_none() {
                    errors.push(
                        EngineError::new(
                            ErrorCategory::Validation,
                            "UNKNOWN_STEP",
                            ErrorSeverity::Error,
                            format!("step '{}' needs unknown step '{dep}'", step.id),
                        )
                        .with_path(format!("workflow.steps[{}].needs", step.id)),
                    );
                }
            }

            if self.registry.resolve(&step.uses).is_err() {
                errors.push(
                    EngineError::new(
                        ErrorCategory::Validation,
                        "UNKNOWN_ADAPTER",
                        ErrorSeverity::Error,
                        format!("step '{}' uses unregistered action '{}'", step.id, step.uses),
                    )
                    .with_path(format!("workflow.steps[{}].uses", step.id)),
                );
            }

            let this_index = workflow.declared_index(&step.id).unwrap_or(usize::MAX);
            let declared_index = |id: &str| workflow.declared_index(id);
            for value in step.with.values().chain(step.env.values()) {
                if let crate::domain::value::Value::String(s) = value {
                    if let Err(e) = validate_forward_references(s, &step.id, &declared_index, this_index) {
                        errors.push(e);
                    }
                }
            }
            if let Some(when) = &step.when {
                if let Err(e) = validate_forward_references(when, &step.id, &declared_index, this_index) {
                    errors.push(e);
                }
            }
            for path in step.outputs.values() {
                if let Err(e) = validate_forward_references(path, &step.id, &declared_index, this_index) {
                    errors.push(e);
                }
            }
        }

        errors
    }
}

fn infer_field_type(key: &str) -> &'static str {
    match key {
        k if k.contains("bill") => "billing",
        k if k.contains("exec") => "execution",
        k if k.contains("identity") || k.contains("owner") => "identity",
        k if k.contains("usage") => "usage",
        _ => "internal",
    }
}

/// Suggested valid step field names, for the typo-suggestion helper.
#[must_use]
pub fn step_field_names() -> &'static [&'static str] {
    STEP_FIELDS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PoliciesBlock, Step, WorkflowMetadata};
    use crate::services::builtin_actions::NoopHandler;
    use std::sync::Arc;

    fn registry() -> ActionRegistry {
        let mut r = ActionRegistry::new();
        r.register(Arc::new(NoopHandler));
        r
    }

    fn step(id: &str, needs: &[&str]) -> Step {
        Step {
            id: id.to_string(),
            name: None,
            uses: "noop".to_string(),
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

    fn workflow(steps: Vec<Step>) -> WorkflowDefinition {
        WorkflowDefinition {
            version: "1".into(),
            kind: "Workflow".into(),
            metadata: WorkflowMetadata::default(),
            inputs: BTreeMap::new(),
            secrets: Default::default(),
            context: BTreeMap::new(),
            defaults: Default::default(),
            policies: PoliciesBlock::default(),
            steps,
            outputs: BTreeMap::new(),
        }
    }

    #[test]
    fn valid_linear_workflow_produces_plan() {
        let r = registry();
        let validator = WorkflowValidator::new(&r);
        let wf = workflow(vec![step("a", &[]), step("b", &["a"])]);
        let plan = validator.validate(wf).unwrap();
        assert_eq!(plan.phases.len(), 2);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let r = registry();
        let validator = WorkflowValidator::new(&r);
        let wf = workflow(vec![step("a", &[]), step("a", &[])]);
        let errors = validator.validate(wf).unwrap_err();
        assert!(errors.iter().any(|e| e.code == "ORB-V-DUPLICATE_ID"));
    }

    #[test]
    fn unregistered_adapter_rejected() {
        let r = registry();
        let validator = WorkflowValidator::new(&r);
        let mut s = step("a", &[]);
        s.uses = "http.request.get".to_string();
        let wf = workflow(vec![s]);
        let errors = validator.validate(wf).unwrap_err();
        assert!(errors.iter().any(|e| e.code == "ORB-V-UNKNOWN_ADAPTER"));
    }

    #[test]
    fn empty_workflow_rejected() {
        let r = registry();
        let validator = WorkflowValidator::new(&r);
        let wf = workflow(vec![]);
        let errors = validator.validate(wf).unwrap_err();
        assert_eq!(errors[0].code, "ORB-V-EMPTY_WORKFLOW");
    }

    #[test]
    fn reserved_field_in_with_rejected() {
        let r = registry();
        let validator = WorkflowValidator::new(&r);
        let mut s = step("a", &[]);
        s.with.insert("_secret".to_string(), crate::domain::value::Value::Bool(true));
        let wf = workflow(vec![s]);
        let errors = validator.validate(wf).unwrap_err();
        assert_eq!(errors[0].code, "ORB-R-PERMISSION_DENIED");
    }

    #[test]
    fn cycle_is_rejected() {
        let r = registry();
        let validator = WorkflowValidator::new(&r);
        let wf = workflow(vec![step("a", &["b"]), step("b", &["a"])]);
        let errors = validator.validate(wf).unwrap_err();
        assert!(errors.iter().any(|e| e.code == "ORB-V-CIRCULAR_DEPENDENCY"));
    }

    #[test]
    fn forward_reference_in_when_is_rejected() {
        let r = registry();
        let validator = WorkflowValidator::new(&r);
        let mut a = step("a", &[]);
        a.when = Some("${steps.b.ready}".to_string());
        let wf = workflow(vec![a, step("b", &[])]);
        let errors = validator.validate(wf).unwrap_err();
        assert!(errors.iter().any(|e| e.code == "ORB-V-FORWARD_REFERENCE"));
    }

    #[test]
    fn backward_reference_in_when_is_accepted() {
        let r = registry();
        let validator = WorkflowValidator::new(&r);
        let mut b = step("b", &["a"]);
        b.when = Some("${steps.a.ready}".to_string());
        let wf = workflow(vec![step("a", &[]), b]);
        assert!(validator.validate(wf).is_ok());
    }
}
