//! Dependency graph, execution phases, and the immutable `ValidatedPlan`
//! (spec §3 `DependencyGraph`/`ExecutionPhase`, §4.7 `ValidatedPlan`).

use super::workflow_def::WorkflowDefinition;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Two parallel adjacency structures over step ids.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// `s -> what s needs` (out-edges).
    pub depends_on: HashMap<String, Vec<String>>,
    /// `s -> what needs s` (in-edges, inverted).
    pub dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    #[must_use]
    pub fn node_ids(&self) -> Vec<String> {
        self.depends_on.keys().cloned().collect()
    }

    #[must_use]
    pub fn in_degree(&self, id: &str) -> usize {
        self.depends_on.get(id).map_or(0, Vec::len)
    }
}

/// A maximal set of steps runnable in parallel once prior phases complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPhase {
    pub index: usize,
    pub step_ids: Vec<String>,
}

/// Per-step earliest/latest start and slack, from the critical-path pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SlackEntry {
    pub earliest_start: f64,
    pub latest_start: f64,
    pub slack: f64,
}

/// The immutable output of the validator + planner: `{workflow, graph,
/// phases, stepById}`. Shareable across concurrent step executions.
#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    pub workflow: WorkflowDefinition,
    pub graph: DependencyGraph,
    pub phases: Vec<ExecutionPhase>,
    pub step_phase: HashMap<String, usize>,
    pub critical_path: Vec<String>,
    pub slack: BTreeMap<String, SlackEntry>,
}

impl ValidatedPlan {
    #[must_use]
    pub fn max_parallelism(&self) -> usize {
        self.phases.iter().map(|p| p.step_ids.len()).max().unwrap_or(0)
    }

    #[must_use]
    pub fn phase_of(&self, step_id: &str) -> Option<usize> {
        self.step_phase.get(step_id).copied()
    }
}
