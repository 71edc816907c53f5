//! Explanation Generator (C14): a dry-run report over a `ValidatedPlan`.
//!
//! Produces a human-inspectable summary without executing anything — phase
//! breakdown, per-step data-flow prediction, conditional-path analysis, a
//! duration estimate along the critical path, and a non-fatal cycle report.
//! Grounded on the teacher's read-only diagnostic services (`cycle`'s
//! `strongly_connected_components`, kept exactly for this purpose per its
//! own doc comment) plus `planner::compute_slack`.

use crate::domain::models::{SlackEntry, Step, ValidatedPlan};
use crate::services::cycle::{detect_cycle, strongly_connected_components};
use crate::services::planner::compute_slack;
use serde::Serialize;
use std::collections::BTreeMap;

/// Default per-handler duration estimate (ms) when none is supplied,
/// bucketed by common `uses` prefixes. A caller passing a richer
/// `duration_hints` map overrides these.
fn default_duration_estimate(uses: &str) -> f64 {
    match uses {
        "noop" | "echo" => 5.0,
        u if u.starts_with("sleep") => 100.0,
        u if u.starts_with("http") => 250.0,
        u if u.starts_with("db") || u.starts_with("sql") => 150.0,
        _ => 100.0,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
    pub index: usize,
    pub step_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepExplanation {
    pub id: String,
    pub uses: String,
    pub needs: Vec<String>,
    pub when: Option<String>,
    pub effective_timeout_ms: u64,
    pub retries: u32,
    pub referenced_inputs: Vec<String>,
    pub referenced_secrets: Vec<String>,
    pub consumed_by: Vec<String>,
    pub estimated_duration_ms: f64,
    pub slack_ms: f64,
    pub on_critical_path: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConditionalPath {
    pub description: String,
    pub step_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeEstimate {
    pub critical_path: Vec<String>,
    pub estimated_total_ms: f64,
    pub bottleneck_step_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub has_cycle: bool,
    pub cycle_path: Option<Vec<String>>,
    pub strongly_connected_components: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub summary: String,
    pub max_parallelism: usize,
    pub phases: Vec<PhaseSummary>,
    pub steps: Vec<StepExplanation>,
    pub conditional_paths: Vec<ConditionalPath>,
    pub time_estimate: TimeEstimate,
    pub cycles: CycleReport,
}

/// Build a full dry-run explanation for an already-validated plan.
/// `duration_hints` lets a caller supply measured handler durations;
/// unspecified steps fall back to a coarse default by `uses` prefix.
#[must_use]
pub fn explain(plan: &ValidatedPlan, duration_hints: &BTreeMap<String, f64>) -> Explanation {
    let durations: BTreeMap<String, f64> = plan
        .workflow
        .steps
        .iter()
        .map(|s| (s.id.clone(), duration_hints.get(&s.id).copied().unwrap_or_else(|| default_duration_estimate(&s.uses))))
        .collect();

    let (slack, critical_path) = compute_slack(&plan.graph, &plan.phases, &durations);

    let phases = plan.phases.iter().map(|p| PhaseSummary { index: p.index, step_ids: p.step_ids.clone() }).collect();

    let steps = plan.workflow.steps.iter().map(|s| explain_step(s, plan, &durations, &slack, &critical_path)).collect();

    let conditional_paths = conditional_path_analysis(&plan.workflow.steps);

    let estimated_total_ms = critical_path.iter().filter_map(|id| durations.get(id)).sum();
    let mean = if durations.is_empty() { 0.0 } else { durations.values().sum::<f64>() / durations.len() as f64 };
    let bottleneck_step_ids = bottlenecks(&durations, &critical_path, mean);

    let cycle_path = detect_cycle(&plan.graph);
    let cycles = CycleReport {
        has_cycle: cycle_path.is_some(),
        cycle_path,
        strongly_connected_components: strongly_connected_components(&plan.graph),
    };

    let summary = format!(
        "workflow '{}' has {} steps across {} phase(s); max parallelism {}; estimated critical-path duration {estimated_total_ms:.0}ms",
        plan.workflow.name(),
        plan.workflow.steps.len(),
        plan.phases.len(),
        plan.max_parallelism(),
    );

    Explanation {
        summary,
        max_parallelism: plan.max_parallelism(),
        phases,
        steps,
        conditional_paths,
        time_estimate: TimeEstimate { critical_path, estimated_total_ms, bottleneck_step_ids },
        cycles,
    }
}

fn explain_step(step: &Step, plan: &ValidatedPlan, durations: &BTreeMap<String, f64>, slack: &BTreeMap<String, SlackEntry>, critical_path: &[String]) -> StepExplanation {
    let effective_timeout_ms = step
        .timeout
        .as_deref()
        .and_then(crate::domain::models::parse_duration_ms)
        .or_else(|| plan.workflow.defaults.timeout.as_deref().and_then(crate::domain::models::parse_duration_ms))
        .unwrap_or(30_000);
    let retries = step.retry.as_ref().map_or(0, |r| r.max);

    let referenced_inputs = referenced_paths(step, "inputs.");
    let referenced_secrets = referenced_paths(step, "secrets.");

    let consumed_by = plan
        .workflow
        .steps
        .iter()
        .filter(|other| other.id != step.id && step_references(other, &step.id))
        .map(|other| other.id.clone())
        .collect();

    StepExplanation {
        id: step.id.clone(),
        uses: step.uses.clone(),
        needs: step.needs.clone(),
        when: step.when.clone(),
        effective_timeout_ms,
        retries,
        referenced_inputs,
        referenced_secrets,
        consumed_by,
        estimated_duration_ms: durations.get(&step.id).copied().unwrap_or(0.0),
        slack_ms: slack.get(&step.id).map_or(0.0, |s| s.slack),
        on_critical_path: critical_path.contains(&step.id),
    }
}

/// Collect every distinct `<prefix><name>` reference across a step's `with`,
/// `env`, and `when` fields, by substring scan (static analysis, no
/// evaluation).
fn referenced_paths(step: &Step, prefix: &str) -> Vec<String> {
    let mut found = Vec::new();
    let marker = format!("${{{prefix}");
    let mut scan = |text: &str| {
        let mut rest = text;
        while let Some(start) = rest.find(&marker) {
            let after = &rest[start + marker.len()..];
            let end = after.find(|c: char| c == '.' || c == '}' || c == ' ' || c == '|').unwrap_or(after.len());
            let name = after[..end].to_string();
            if !name.is_empty() && !found.contains(&name) {
                found.push(name);
            }
            rest = &after[end..];
        }
    };
    for v in step.with.values().chain(step.env.values()) {
        if let crate::domain::value::Value::String(s) = v {
            scan(s);
        }
    }
    if let Some(when) = &step.when {
        scan(when);
    }
    found
}

fn step_references(step: &Step, target_id: &str) -> bool {
    let marker = format!("${{steps.{target_id}");
    let mut hits = |text: &str| text.contains(&marker);
    let values_hit = step.with.values().chain(step.env.values()).any(|v| match v {
        crate::domain::value::Value::String(s) => hits(s),
        _ => false,
    });
    values_hit || step.when.as_deref().is_some_and(hits)
}

/// Enumerate the all-true and all-false conditional paths: steps with no
/// `when` always run; steps with a `when` either all evaluate true (the
/// "happy path") or all evaluate false (the "skip path"). This is a static
/// enumeration, not a live evaluation.
fn conditional_path_analysis(steps: &[Step]) -> Vec<ConditionalPath> {
    let conditional: Vec<&Step> = steps.iter().filter(|s| s.when.is_some()).collect();
    if conditional.is_empty() {
        return Vec::new();
    }
    vec![
        ConditionalPath {
            description: "all conditions true".to_string(),
            step_ids: steps.iter().map(|s| s.id.clone()).collect(),
        },
        ConditionalPath {
            description: "all conditions false".to_string(),
            step_ids: steps.iter().filter(|s| s.when.is_none()).map(|s| s.id.clone()).collect(),
        },
    ]
}

/// A critical-path step is flagged as a bottleneck once its estimated
/// duration exceeds 1.5x the mean duration across all steps.
fn bottlenecks(durations: &BTreeMap<String, f64>, critical_path: &[String], mean: f64) -> Vec<String> {
    if mean <= 0.0 {
        return Vec::new();
    }
    critical_path
        .iter()
        .filter(|id| durations.get(*id).copied().unwrap_or(0.0) > mean * 1.5)
        .cloned()
        .collect()
}
