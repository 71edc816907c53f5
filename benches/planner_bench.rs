//! Micro-benchmarks over the topological planner and cycle detector,
//! matching the teacher's `criterion` benchmarking setup.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use orbyt::domain::models::{DependencyGraph, Step, WorkflowDefinition};
use orbyt::services::cycle::detect_cycle;
use orbyt::services::graph::build_graph;
use orbyt::services::planner::plan_phases;
use std::collections::BTreeMap;

/// A wide layer graph: `width` independent steps depend on a single root,
/// then another `width` steps depend on all of those — a shape that
/// exercises both wide phases and moderate fan-in/fan-out.
fn layered_workflow(width: usize, layers: usize) -> WorkflowDefinition {
    let mut steps = Vec::new();
    steps.push(step("root", &[]));

    let mut previous_layer = vec!["root".to_string()];
    for layer in 0..layers {
        let mut current_layer = Vec::with_capacity(width);
        for i in 0..width {
            let id = format!("l{layer}_{i}");
            let needs: Vec<&str> = previous_layer.iter().map(String::as_str).collect();
            steps.push(step(&id, &needs));
            current_layer.push(id);
        }
        previous_layer = current_layer;
    }

    WorkflowDefinition {
        version: "1".into(),
        kind: "Workflow".into(),
        metadata: Default::default(),
        inputs: BTreeMap::new(),
        secrets: Default::default(),
        context: BTreeMap::new(),
        defaults: Default::default(),
        policies: Default::default(),
        steps,
        outputs: BTreeMap::new(),
    }
}

fn step(id: &str, needs: &[&str]) -> Step {
    Step {
        id: id.to_string(),
        name: None,
        uses: "noop".to_string(),
        with: BTreeMap::new(),
        needs: needs.iter().map(|s| (*s).to_string()).collect(),
        when: None,
        timeout: None,
        retry: None,
        continue_on_error: false,
        outputs: BTreeMap::new(),
        env: BTreeMap::new(),
    }
}

fn bench_plan_phases(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_phases");
    for &(width, layers) in &[(10, 3), (50, 5), (100, 8)] {
        let workflow = layered_workflow(width, layers);
        let graph = build_graph(&workflow).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(format!("{width}x{layers}")), &graph, |b, graph| {
            b.iter(|| plan_phases(black_box(graph)).unwrap());
        });
    }
    group.finish();
}

fn bench_detect_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect_cycle");
    for &(width, layers) in &[(10, 3), (50, 5), (100, 8)] {
        let workflow = layered_workflow(width, layers);
        let graph = build_graph(&workflow).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(format!("{width}x{layers}")), &graph, |b, graph| {
            b.iter(|| detect_cycle(black_box(graph)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_plan_phases, bench_detect_cycle);
criterion_main!(benches);
