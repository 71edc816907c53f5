//! Dependency graph construction (C3).

use crate::domain::error::{EngineError, ErrorCategory, ErrorSeverity};
use crate::domain::models::{DependencyGraph, WorkflowDefinition};
use std::collections::HashMap;

/// Build the dependency graph from a workflow's step list in a single pass:
/// record `needs` as out-edges, build the reverse map in parallel. Every
/// edge target must exist.
pub fn build_graph(workflow: &WorkflowDefinition) -> Result<DependencyGraph, EngineError> {
    let mut depends_on: HashMap<String, Vec<String>> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

    for step in &workflow.steps {
        depends_on.entry(step.id.clone()).or_default();
        dependents.entry(step.id.clone()).or_default();
    }

    for step in &workflow.steps {
        for dep in &step.needs {
            if !depends_on.contains_key(dep) {
                return Err(EngineError::new(
                    ErrorCategory::Validation,
                    "UNKNOWN_STEP",
                    ErrorSeverity::Error,
                    format!("step '{}' needs unknown step '{dep}'", step.id),
                )
                .with_path(format!("workflow.steps[{}].needs", step.id))
                .with_hint("every entry in `needs` must reference a step id declared in this workflow"));
            }
            depends_on.get_mut(&step.id).unwrap().push(dep.clone());
            dependents.get_mut(dep).unwrap().push(step.id.clone());
        }
    }

    Ok(DependencyGraph { depends_on, dependents })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Step;

    fn step(id: &str, needs: &[&str]) -> Step {
        Step {
            id: id.to_string(),
            name: None,
            uses: "noop".to_string(),
            with: Default::default(),
            needs: needs.iter().map(|s| s.to_string()).collect(),
            when: None,
            timeout: None,
            retry: None,
            continue_on_error: false,
            outputs: Default::default(),
            env: Default::default(),
        }
    }

    fn workflow(steps: Vec<Step>) -> WorkflowDefinition {
        WorkflowDefinition {
            version: "1".into(),
            kind: "Workflow".into(),
            metadata: Default::default(),
            inputs: Default::default(),
            secrets: Default::default(),
            context: Default::default(),
            defaults: Default::default(),
            policies: Default::default(),
            steps,
            outputs: Default::default(),
        }
    }

    #[test]
    fn builds_adjacency_both_directions() {
        let wf = workflow(vec![step("a", &[]), step("b", &["a"])]);
        let graph = build_graph(&wf).unwrap();
        assert_eq!(graph.depends_on["b"], vec!["a".to_string()]);
        assert_eq!(graph.dependents["a"], vec!["b".to_string()]);
        assert!(graph.dependents["b"].is_empty());
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let wf = workflow(vec![step("a", &["ghost"])]);
        let err = build_graph(&wf).unwrap_err();
        assert_eq!(err.code, "ORB-V-UNKNOWN_STEP");
    }
}
