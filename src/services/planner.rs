//! Topological phase planner with critical-path/slack analysis (C5).

use crate::domain::error::{EngineError, ErrorCategory, ErrorSeverity};
use crate::domain::models::{DependencyGraph, ExecutionPhase, SlackEntry};
use std::collections::{BTreeMap, HashMap};

/// Kahn's algorithm: repeatedly take every node with in-degree 0 not yet
/// emitted, emit them together as the next phase, decrement in-degree of
/// their dependents. If nodes remain with no in-degree-0 candidate, the
/// graph has a cycle (a safety net behind the dedicated cycle detector).
pub fn plan_phases(graph: &DependencyGraph) -> Result<(Vec<ExecutionPhase>, HashMap<String, usize>), EngineError> {
    let mut remaining_in_degree: HashMap<&str, usize> =
        graph.depends_on.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
    let mut emitted: HashMap<String, usize> = HashMap::new();
    let mut phases = Vec::new();

    let total = graph.depends_on.len();
    while emitted.len() < total {
        let mut ready: Vec<&str> = remaining_in_degree
            .iter()
            .filter(|(id, &deg)| deg == 0 && !emitted.contains_key(**id))
            .map(|(id, _)| *id)
            .collect();
        ready.sort_unstable();

        if ready.is_empty() {
            return Err(EngineError::new(
                ErrorCategory::Validation,
                "CIRCULAR_DEPENDENCY",
                ErrorSeverity::Fatal,
                "no step has its dependencies satisfied but steps remain unscheduled",
            )
            .with_hint("the workflow's dependency graph contains a cycle"));
        }

        let phase_index = phases.len();
        for id in &ready {
            emitted.insert((*id).to_string(), phase_index);
            if let Some(dependents) = graph.dependents.get(*id) {
                for dep in dependents {
                    if let Some(entry) = remaining_in_degree.get_mut(dep.as_str()) {
                        *entry = entry.saturating_sub(1);
                    }
                }
            }
        }

        phases.push(ExecutionPhase {
            index: phase_index,
            step_ids: ready.into_iter().map(str::to_string).collect(),
        });
    }

    Ok((phases, emitted))
}

/// Estimated per-step duration in milliseconds, supplied by the caller (the
/// explanation generator), not computed by the planner itself.
pub type DurationEstimates<'a> = &'a BTreeMap<String, f64>;

/// Earliest/latest start and slack for every step given phase assignment
/// and duration estimates. Steps with zero slack form the critical path.
#[must_use]
pub fn compute_slack(
    graph: &DependencyGraph,
    phases: &[ExecutionPhase],
    durations: DurationEstimates<'_>,
) -> (BTreeMap<String, SlackEntry>, Vec<String>) {
    let default_duration = 0.0;
    let mut earliest_finish: BTreeMap<String, f64> = BTreeMap::new();
    let mut earliest_start: BTreeMap<String, f64> = BTreeMap::new();

    for phase in phases {
        for id in &phase.step_ids {
            let deps = graph.depends_on.get(id).cloned().unwrap_or_default();
            let start = deps
                .iter()
                .map(|d| earliest_finish.get(d).copied().unwrap_or(0.0))
                .fold(0.0_f64, f64::max);
            let dur = durations.get(id).copied().unwrap_or(default_duration);
            earliest_start.insert(id.clone(), start);
            earliest_finish.insert(id.clone(), start + dur);
        }
    }

    let project_finish = earliest_finish.values().copied().fold(0.0_f64, f64::max);

    let mut latest_finish: BTreeMap<String, f64> = BTreeMap::new();
    let mut latest_start: BTreeMap<String, f64> = BTreeMap::new();

    for phase in phases.iter().rev() {
        for id in &phase.step_ids {
            let dependents = graph.dependents.get(id).cloned().unwrap_or_default();
            let finish = if dependents.is_empty() {
                project_finish
            } else {
                dependents
                    .iter()
                    .map(|d| latest_start.get(d).copied().unwrap_or(project_finish))
                    .fold(f64::INFINITY, f64::min)
            };
            let dur = durations.get(id).copied().unwrap_or(default_duration);
            latest_finish.insert(id.clone(), finish);
            latest_start.insert(id.clone(), finish - dur);
        }
    }

    let mut slack = BTreeMap::new();
    let mut critical_path = Vec::new();
    for phase in phases {
        for id in &phase.step_ids {
            let es = earliest_start.get(id).copied().unwrap_or(0.0);
            let ls = latest_start.get(id).copied().unwrap_or(0.0);
            let s = (ls - es).max(0.0);
            slack.insert(id.clone(), SlackEntry { earliest_start: es, latest_start: ls, slack: s });
            if s < f64::EPSILON {
                critical_path.push(id.clone());
            }
        }
    }

    (slack, critical_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
        let mut depends_on = Map::new();
        let mut dependents: Map<String, Vec<String>> = Map::new();
        for (id, _) in edges {
            depends_on.entry((*id).to_string()).or_insert_with(Vec::new);
            dependents.entry((*id).to_string()).or_insert_with(Vec::new);
        }
        for (id, deps) in edges {
            for d in *deps {
                depends_on.get_mut(*id).unwrap().push((*d).to_string());
                dependents.get_mut(*d).unwrap().push((*id).to_string());
            }
        }
        DependencyGraph { depends_on, dependents }
    }

    #[test]
    fn linear_chain_gives_one_step_per_phase() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let (phases, step_phase) = plan_phases(&g).unwrap();
        assert_eq!(phases.len(), 3);
        assert_eq!(step_phase["a"], 0);
        assert_eq!(step_phase["b"], 1);
        assert_eq!(step_phase["c"], 2);
    }

    #[test]
    fn independent_steps_share_phase_zero() {
        let g = graph(&[("a", &[]), ("b", &[]), ("c", &[])]);
        let (phases, _) = plan_phases(&g).unwrap();
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].step_ids.len(), 3);
    }

    #[test]
    fn diamond_respects_topological_order() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
        let (phases, step_phase) = plan_phases(&g).unwrap();
        assert_eq!(phases.len(), 3);
        assert_eq!(step_phase["a"], 0);
        assert_eq!(step_phase["b"], 1);
        assert_eq!(step_phase["c"], 1);
        assert_eq!(step_phase["d"], 2);
        assert!(phases[1].step_ids.contains(&"b".to_string()));
        assert!(phases[1].step_ids.contains(&"c".to_string()));
    }

    #[test]
    fn cyclic_graph_is_rejected_as_safety_net() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        let err = plan_phases(&g).unwrap_err();
        assert_eq!(err.code, "ORB-V-CIRCULAR_DEPENDENCY");
    }

    #[test]
    fn slack_is_zero_on_the_only_chain() {
        let g = graph(&[("a", &[]), ("b", &["a"])]);
        let (phases, _) = plan_phases(&g).unwrap();
        let mut durations = BTreeMap::new();
        durations.insert("a".to_string(), 10.0);
        durations.insert("b".to_string(), 5.0);
        let (slack, critical) = compute_slack(&g, &phases, &durations);
        assert!((slack["a"].slack).abs() < 1e-9);
        assert!((slack["b"].slack).abs() < 1e-9);
        assert_eq!(critical.len(), 2);
    }
}
