//! Cycle detection (C4): three-color DFS with parent-pointer path
//! reconstruction, plus a Tarjan SCC pass for richer diagnostics.

use crate::domain::models::DependencyGraph;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Walk the graph with three-color DFS. On encountering a GRAY neighbor,
/// reconstructs the cycle path (stepId sequence, last element == first) by
/// walking parent pointers from the current node back to the reopened node.
#[must_use]
pub fn detect_cycle(graph: &DependencyGraph) -> Option<Vec<String>> {
    let mut color: HashMap<&str, Color> = graph.depends_on.keys().map(|k| (k.as_str(), Color::White)).collect();
    let mut parent: HashMap<String, String> = HashMap::new();

    let mut ids: Vec<&str> = graph.depends_on.keys().map(String::as_str).collect();
    ids.sort_unstable();

    for start in ids {
        if color[start] == Color::White {
            if let Some(cycle) = visit(graph, start, &mut color, &mut parent) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit(
    graph: &DependencyGraph,
    node: &str,
    color: &mut HashMap<&str, Color>,
    parent: &mut HashMap<String, String>,
) -> Option<Vec<String>> {
    color.insert(node, Color::Gray);

    if let Some(deps) = graph.depends_on.get(node) {
        for dep in deps {
            match color.get(dep.as_str()).copied() {
                Some(Color::Gray) => {
                    // Found a back-edge node -> dep. Walk parent pointers from
                    // node back up to dep, then reverse and close the loop.
                    let mut chain = vec![node.to_string()];
                    let mut cursor = node.to_string();
                    while cursor != *dep {
                        let Some(p) = parent.get(&cursor) else { break };
                        cursor = p.clone();
                        chain.push(cursor.clone());
                    }
                    chain.reverse();
                    chain.push(dep.clone());
                    return Some(chain);
                }
                Some(Color::White) => {
                    parent.insert(dep.clone(), node.to_string());
                    if let Some(cycle) = visit(graph, dep, color, parent) {
                        return Some(cycle);
                    }
                }
                _ => {}
            }
        }
    }

    color.insert(node, Color::Black);
    None
}

/// Tarjan's strongly-connected-components algorithm. Used only by the
/// explanation generator for richer cycle diagnostics, not by the planner.
#[must_use]
pub fn strongly_connected_components(graph: &DependencyGraph) -> Vec<Vec<String>> {
    struct Ctx<'g> {
        graph: &'g DependencyGraph,
        index: HashMap<String, usize>,
        lowlink: HashMap<String, usize>,
        on_stack: HashSet<String>,
        stack: Vec<String>,
        counter: usize,
        sccs: Vec<Vec<String>>,
    }

    fn strongconnect(ctx: &mut Ctx<'_>, v: &str) {
        ctx.index.insert(v.to_string(), ctx.counter);
        ctx.lowlink.insert(v.to_string(), ctx.counter);
        ctx.counter += 1;
        ctx.stack.push(v.to_string());
        ctx.on_stack.insert(v.to_string());

        if let Some(deps) = ctx.graph.depends_on.get(v).cloned() {
            for w in deps {
                if !ctx.index.contains_key(&w) {
                    strongconnect(ctx, &w);
                    let low_w = ctx.lowlink[&w];
                    let low_v = ctx.lowlink[v];
                    ctx.lowlink.insert(v.to_string(), low_v.min(low_w));
                } else if ctx.on_stack.contains(&w) {
                    let idx_w = ctx.index[&w];
                    let low_v = ctx.lowlink[v];
                    ctx.lowlink.insert(v.to_string(), low_v.min(idx_w));
                }
            }
        }

        if ctx.lowlink[v] == ctx.index[v] {
            let mut component = Vec::new();
            loop {
                let w = ctx.stack.pop().unwrap();
                ctx.on_stack.remove(&w);
                let is_v = w == v;
                component.push(w);
                if is_v {
                    break;
                }
            }
            ctx.sccs.push(component);
        }
    }

    let mut ctx = Ctx {
        graph,
        index: HashMap::new(),
        lowlink: HashMap::new(),
        on_stack: HashSet::new(),
        stack: Vec::new(),
        counter: 0,
        sccs: Vec::new(),
    };

    let mut ids: Vec<String> = graph.depends_on.keys().cloned().collect();
    ids.sort_unstable();
    for id in ids {
        if !ctx.index.contains_key(&id) {
            strongconnect(&mut ctx, &id);
        }
    }

    ctx.sccs.into_iter().filter(|scc| scc.len() > 1).collect()
}
