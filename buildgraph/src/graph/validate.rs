//! Cycle detection and the validated, immutable graph.

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::NodeIndex;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::ops::Deref;
use tracing::{debug, warn};

use super::{EdgeKind, TaskGraph};
use crate::core::{NodeId, TargetId};
use crate::errors::{DependencyCycle, OrderingError};

/// A task graph proven acyclic. No edge can be added to it.
#[derive(Debug, Clone)]
pub struct ValidatedGraph {
    graph: TaskGraph,
    order: Vec<NodeIndex>,
}

impl ValidatedGraph {
    /// Returns node identities in a topological order.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&NodeId> {
        self.order.iter().map(|&idx| &self.graph.inner()[idx].id).collect()
    }

    /// Returns the underlying graph.
    #[must_use]
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }
}

impl Deref for ValidatedGraph {
    type Target = TaskGraph;

    fn deref(&self) -> &TaskGraph {
        &self.graph
    }
}

/// Rejects graphs containing structural cycles.
///
/// Every strongly connected component with more than one node, and every
/// self-loop, yields one [`DependencyCycle`]. Nothing is executed for a
/// rejected graph.
///
/// # Errors
///
/// Returns an [`OrderingError`] listing every cycle found.
pub fn validate(graph: TaskGraph) -> Result<ValidatedGraph, OrderingError> {
    let inner = graph.inner();
    if let Ok(order) = toposort(inner, None) {
        debug!(nodes = order.len(), "Task graph is acyclic");
        return Ok(ValidatedGraph { graph, order });
    }

    let mut cycles: Vec<DependencyCycle> = tarjan_scc(inner)
        .into_iter()
        .filter(|scc| scc.len() > 1 || inner.contains_edge(scc[0], scc[0]))
        .map(|scc| describe_cycle(&graph, &scc))
        .collect();
    cycles.sort_by(|a, b| a.participants.cmp(&b.participants));

    warn!(cycles = cycles.len(), "Task graph contains dependency cycles");
    Err(OrderingError { cycles })
}

/// Finds the shortest cycle through the lowest-identity member of a
/// component, then appends any other members.
fn describe_cycle(graph: &TaskGraph, scc: &[NodeIndex]) -> DependencyCycle {
    let inner = graph.inner();
    let members: HashSet<NodeIndex> = scc.iter().copied().collect();
    let Some(&start) = scc.iter().min_by(|&&a, &&b| inner[a].id.cmp(&inner[b].id)) else {
        return DependencyCycle {
            participants: Vec::new(),
            targets: Vec::new(),
            message: "Cycle in dependencies".to_string(),
        };
    };

    let path = shortest_cycle(graph, start, &members);

    let mut participants: Vec<NodeId> = path.iter().map(|&idx| inner[idx].id.clone()).collect();
    let on_path: HashSet<NodeIndex> = path.iter().copied().collect();
    let rest: BTreeSet<NodeId> = scc
        .iter()
        .filter(|&&idx| !on_path.contains(&idx))
        .map(|&idx| inner[idx].id.clone())
        .collect();
    participants.extend(rest);

    let mut targets: Vec<TargetId> = Vec::new();
    for &idx in &path {
        let target = &inner[idx].target;
        if !targets.contains(target) {
            targets.push(target.clone());
        }
    }

    let message = format_cycle(graph, &path, &targets);
    DependencyCycle {
        participants,
        targets,
        message,
    }
}

/// Breadth-first search from `start` back to itself, inside the component.
fn shortest_cycle(graph: &TaskGraph, start: NodeIndex, members: &HashSet<NodeIndex>) -> Vec<NodeIndex> {
    let inner = graph.inner();
    if inner.contains_edge(start, start) {
        return vec![start];
    }

    let sorted_successors = |idx: NodeIndex| {
        let mut next: Vec<NodeIndex> = inner
            .neighbors(idx)
            .filter(|n| members.contains(n))
            .collect();
        next.sort_by(|&a, &b| inner[a].id.cmp(&inner[b].id));
        next.dedup();
        next
    };

    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    let mut last = None;
    'search: while let Some(current) = queue.pop_front() {
        for next in sorted_successors(current) {
            if next == start {
                last = Some(current);
                break 'search;
            }
            if !parent.contains_key(&next) {
                parent.insert(next, current);
                queue.push_back(next);
            }
        }
    }

    let mut path = Vec::new();
    let mut cursor = last;
    while let Some(idx) = cursor {
        path.push(idx);
        cursor = if idx == start { None } else { parent.get(&idx).copied() };
    }
    path.reverse();
    path
}

fn format_cycle(graph: &TaskGraph, path: &[NodeIndex], targets: &[TargetId]) -> String {
    let inner = graph.inner();
    let mut message = String::from("Cycle ");
    if targets.len() <= 1 {
        let name = targets
            .first()
            .map_or_else(|| "a single target".to_string(), ToString::to_string);
        message.push_str(&format!(
            "inside {name}; building could produce unreliable results.\n"
        ));
    } else {
        message.push_str(&format!(
            "in dependencies between targets '{}' and '{}'; building could produce unreliable results.\n",
            targets[0],
            targets[targets.len() - 1]
        ));
        let mut hops: Vec<String> = targets.iter().map(ToString::to_string).collect();
        hops.push(targets[0].to_string());
        message.push_str(&format!("Cycle path: {}\n", hops.join(" → ")));
    }

    message.push_str("Cycle details:");
    let serial = path.iter().enumerate().any(|(i, &idx)| {
        let next = path[(i + 1) % path.len()];
        inner
            .find_edge(idx, next)
            .is_some_and(|e| inner[e] == EdgeKind::SerialTargetOrder)
    });
    if serial {
        message.push_str("\nTarget build order preserved because target parallelization is disabled");
    }

    let mut current_target: Option<&TargetId> = None;
    for (i, &idx) in path.iter().enumerate() {
        let node = &inner[idx];
        let next = &inner[path[(i + 1) % path.len()]];
        let edge = inner
            .find_edge(idx, path[(i + 1) % path.len()])
            .map_or_else(String::new, |e| inner[e].to_string());
        let marker = if current_target == Some(&node.target) {
            "○"
        } else {
            "→"
        };
        current_target = Some(&node.target);
        message.push_str(&format!(
            "\n{marker} Target '{}': {} '{}' ({}) must finish before '{}' ({}) via {edge}",
            node.target, node.kind, node.name, node.id, next.name, next.id
        ));
    }
    message
}
