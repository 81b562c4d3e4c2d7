//! Expands a resolved project model into a task graph.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use super::{EdgeKind, TargetInfo, TaskGraph, TaskNode};
use crate::actions::{ActionRegistry, GateAction, ProcessAction, TaskAction};
use crate::core::{Artifact, Diagnostic, NodeId, TargetId};
use crate::errors::GraphConstructionError;
use crate::model::{BuildRequest, Target, WorkItem};

/// A declared target with its honored dependencies resolved.
struct Declared<'a> {
    id: TargetId,
    target: &'a Target,
    dependencies: Vec<TargetId>,
}

/// Builds task graphs from build requests.
#[derive(Debug)]
pub struct GraphBuilder {
    registry: Arc<ActionRegistry>,
    gate: Arc<dyn TaskAction>,
    process: Arc<dyn TaskAction>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new(Arc::new(ActionRegistry::new()))
    }
}

impl GraphBuilder {
    /// Creates a builder that resolves tools through the given registry.
    #[must_use]
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            gate: Arc::new(GateAction),
            process: Arc::new(ProcessAction),
        }
    }

    /// Returns the action registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// Builds the task graph for a request.
    ///
    /// # Errors
    ///
    /// Returns an error if two nodes declare the same output, a dependency
    /// or requested target does not exist, a target is declared twice, or a
    /// work item names an unregistered tool.
    pub fn build(&self, request: &BuildRequest) -> Result<TaskGraph, GraphConstructionError> {
        let mut graph = TaskGraph::new(
            request.workspace.name.clone(),
            request.scope,
            request.parallelize_targets,
            request.settings.clone(),
        );

        let declared = self.resolve_targets(request, &mut graph)?;
        let selected = select_targets(request, &declared)?;

        let mut infos = Vec::new();
        for decl in declared.iter().filter(|d| selected.contains(&d.id)) {
            let groups = self.expand_target(decl, &mut graph)?;
            for pair in groups.windows(2) {
                for from in &pair[0] {
                    for to in &pair[1] {
                        graph.add_edge(from, to, EdgeKind::PhaseOrder);
                    }
                }
            }
            infos.push(TargetInfo {
                id: decl.id.clone(),
                nodes: groups.into_iter().flatten().collect(),
                entries: Vec::new(),
                terminals: Vec::new(),
                dependencies: decl.dependencies.clone(),
            });
        }

        add_data_edges(&mut graph)?;

        for info in &mut infos {
            info.entries = boundary_nodes(&graph, info, true);
            info.terminals = boundary_nodes(&graph, info, false);
        }

        add_target_edges(&mut graph, &infos);

        let order = if request.parallelize_targets {
            graph.push_note(Diagnostic::note("Building targets in parallel"));
            (0..infos.len()).collect()
        } else {
            graph.push_note(Diagnostic::note("Building targets in dependency order"));
            let order = serial_order(&graph, &infos);
            add_serial_edges(&mut graph, &infos, &order);
            order
        };

        for idx in order {
            graph.push_target(infos[idx].clone());
        }

        info!(
            workspace = %graph.name(),
            targets = graph.targets().len(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Task graph constructed"
        );
        Ok(graph)
    }

    fn resolve_targets<'a>(
        &self,
        request: &'a BuildRequest,
        graph: &mut TaskGraph,
    ) -> Result<Vec<Declared<'a>>, GraphConstructionError> {
        let mut declared: Vec<Declared<'a>> = Vec::new();
        let mut known = HashSet::new();
        for (id, target) in request.workspace.targets() {
            if !known.insert(id.clone()) {
                return Err(GraphConstructionError::DuplicateTarget { target: id });
            }
            declared.push(Declared {
                id,
                target,
                dependencies: Vec::new(),
            });
        }

        for decl in &mut declared {
            let mut honored = Vec::new();
            for reference in &decl.target.dependencies {
                let dependency = reference.resolve(&decl.id.project);
                if !known.contains(&dependency) {
                    return Err(GraphConstructionError::UnknownTarget {
                        target: reference.clone(),
                        referenced_by: decl.id.clone(),
                    });
                }
                if !request.scope.honors(&decl.id, &dependency) {
                    debug!(target = %decl.id, dependency = %dependency, "Dependency outside scope");
                    graph.push_note(Diagnostic::note(format!(
                        "Dependency of '{}' on '{}' is outside the {} scope and was not honored",
                        decl.id, dependency, request.scope
                    )));
                    continue;
                }
                if !honored.contains(&dependency) {
                    honored.push(dependency);
                }
            }
            decl.dependencies = honored;
        }

        Ok(declared)
    }

    /// Creates the nodes of one target and returns its non-empty phases.
    fn expand_target(
        &self,
        decl: &Declared<'_>,
        graph: &mut TaskGraph,
    ) -> Result<Vec<Vec<NodeId>>, GraphConstructionError> {
        let mut groups = Vec::new();
        for (phase_index, phase) in decl.target.phases.iter().enumerate() {
            let mut group = Vec::with_capacity(phase.items.len());
            for (ordinal, item) in phase.items.iter().enumerate() {
                let id = NodeId::derive(&decl.id, phase_index, &phase.name, ordinal);
                let action = self.resolve_action(&id, item)?;
                graph.add_node(TaskNode::from_work_item(
                    id.clone(),
                    decl.id.clone(),
                    phase_index,
                    item.clone(),
                    action,
                ));
                group.push(id);
            }
            if !group.is_empty() {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    fn resolve_action(
        &self,
        id: &NodeId,
        item: &WorkItem,
    ) -> Result<Arc<dyn TaskAction>, GraphConstructionError> {
        match &item.tool {
            Some(tool) => self
                .registry
                .get(tool)
                .ok_or_else(|| GraphConstructionError::UnknownTool {
                    node: id.clone(),
                    tool: tool.clone(),
                }),
            None if item.is_gate() => Ok(Arc::clone(&self.gate)),
            None => Ok(Arc::clone(&self.process)),
        }
    }
}

/// Returns the requested targets plus the closure of their dependencies.
fn select_targets(
    request: &BuildRequest,
    declared: &[Declared<'_>],
) -> Result<HashSet<TargetId>, GraphConstructionError> {
    if request.targets.is_empty() {
        return Ok(declared.iter().map(|d| d.id.clone()).collect());
    }

    let by_id: HashMap<&TargetId, &Declared<'_>> = declared.iter().map(|d| (&d.id, d)).collect();
    let mut selected = HashSet::new();
    let mut stack = Vec::new();
    for reference in &request.targets {
        let found = declared.iter().find(|d| match &reference.project {
            Some(project) => d.id.project == *project && d.id.name == reference.target,
            None => d.id.name == reference.target,
        });
        match found {
            Some(decl) => stack.push(&decl.id),
            None => {
                return Err(GraphConstructionError::UnknownRequestedTarget {
                    target: reference.clone(),
                })
            }
        }
    }

    while let Some(id) = stack.pop() {
        if !selected.insert(id.clone()) {
            continue;
        }
        if let Some(decl) = by_id.get(id) {
            stack.extend(decl.dependencies.iter());
        }
    }
    Ok(selected)
}

fn add_data_edges(graph: &mut TaskGraph) -> Result<(), GraphConstructionError> {
    let mut producers: BTreeMap<Artifact, Vec<NodeId>> = BTreeMap::new();
    for node in graph.nodes() {
        let outputs: BTreeSet<&Artifact> = node.outputs.iter().collect();
        for output in outputs {
            producers
                .entry(output.clone())
                .or_default()
                .push(node.id.clone());
        }
    }

    if let Some((artifact, ids)) = producers.iter().find(|(_, ids)| ids.len() > 1) {
        let mut ids = ids.clone();
        ids.sort();
        return Err(GraphConstructionError::AmbiguousProducer {
            artifact: artifact.clone(),
            producers: ids,
        });
    }

    let consumers: Vec<(NodeId, Artifact)> = graph
        .nodes()
        .flat_map(|node| node.inputs.iter().map(|input| (node.id.clone(), input.clone())))
        .collect();
    for (consumer, artifact) in consumers {
        if let Some(producer) = producers.get(&artifact).and_then(|ids| ids.first()) {
            if *producer != consumer {
                graph.add_edge(producer, &consumer, EdgeKind::Data(artifact));
            }
        }
    }
    Ok(())
}

/// Nodes with no predecessor (`entries`) or no successor inside the target.
fn boundary_nodes(graph: &TaskGraph, info: &TargetInfo, entries: bool) -> Vec<NodeId> {
    info.nodes
        .iter()
        .filter(|id| {
            let neighbors = if entries {
                graph.predecessors(id)
            } else {
                graph.successors(id)
            };
            neighbors
                .into_iter()
                .filter_map(|n| graph.node(n))
                .all(|n| n.target != info.id)
        })
        .cloned()
        .collect()
}

/// Terminal nodes standing in for a target; empty targets are transparent.
fn effective_terminals(
    id: &TargetId,
    infos: &[TargetInfo],
    visited: &mut HashSet<TargetId>,
) -> Vec<NodeId> {
    if !visited.insert(id.clone()) {
        return Vec::new();
    }
    let Some(info) = infos.iter().find(|t| &t.id == id) else {
        return Vec::new();
    };
    if !info.is_empty() {
        return info.terminals.clone();
    }
    let mut terminals = Vec::new();
    for dependency in &info.dependencies {
        terminals.extend(effective_terminals(dependency, infos, visited));
    }
    terminals
}

fn add_target_edges(graph: &mut TaskGraph, infos: &[TargetInfo]) {
    for info in infos.iter().filter(|t| !t.is_empty()) {
        for dependency in &info.dependencies {
            let terminals = effective_terminals(dependency, infos, &mut HashSet::new());
            for from in &terminals {
                for to in &info.entries {
                    graph.add_edge(from, to, EdgeKind::TargetDependency);
                }
            }
        }
    }
}

/// Orders targets by honored and data dependencies, ties broken by
/// declaration order. Targets stuck on a cycle keep declaration order.
fn serial_order(graph: &TaskGraph, infos: &[TargetInfo]) -> Vec<usize> {
    let position: HashMap<&TargetId, usize> =
        infos.iter().enumerate().map(|(i, t)| (&t.id, i)).collect();
    let mut depends_on: Vec<BTreeSet<usize>> = infos
        .iter()
        .map(|info| {
            info.dependencies
                .iter()
                .filter_map(|d| position.get(d).copied())
                .collect()
        })
        .collect();

    for (from, to, kind) in graph.edges() {
        if !matches!(kind, EdgeKind::Data(_)) {
            continue;
        }
        let (Some(a), Some(b)) = (graph.node(from), graph.node(to)) else {
            continue;
        };
        if a.target != b.target {
            if let (Some(&pa), Some(&pb)) = (position.get(&a.target), position.get(&b.target)) {
                depends_on[pb].insert(pa);
            }
        }
    }

    let mut remaining: Vec<usize> = depends_on.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = (0..infos.len()).filter(|&i| remaining[i] == 0).collect();
    let mut placed = vec![false; infos.len()];
    let mut order = Vec::with_capacity(infos.len());

    while let Some(next) = ready.pop_first() {
        placed[next] = true;
        order.push(next);
        for (i, deps) in depends_on.iter().enumerate() {
            if !placed[i] && deps.contains(&next) {
                remaining[i] -= 1;
                if remaining[i] == 0 {
                    ready.insert(i);
                }
            }
        }
    }

    order.extend((0..infos.len()).filter(|&i| !placed[i]));
    order
}

fn add_serial_edges(graph: &mut TaskGraph, infos: &[TargetInfo], order: &[usize]) {
    let mut previous: Option<&TargetInfo> = None;
    for &idx in order {
        let info = &infos[idx];
        if info.is_empty() {
            continue;
        }
        if let Some(prev) = previous {
            for from in &prev.terminals {
                for to in &info.entries {
                    graph.add_edge(from, to, EdgeKind::SerialTargetOrder);
                }
            }
        }
        previous = Some(info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CommandSpec, TargetRef};
    use crate::model::{DependencyScope, Phase, Project, Workspace};
    use pretty_assertions::assert_eq;

    fn cc(name: &str) -> WorkItem {
        WorkItem::new(name, CommandSpec::new("cc").arg(name))
    }

    fn id(raw: &str) -> NodeId {
        NodeId::from_raw(raw)
    }

    fn two_phase_target(name: &str) -> Target {
        Target::new(name)
            .phase(Phase::new("Headers").item(cc("h1")).item(cc("h2")))
            .phase(Phase::new("Sources").item(cc("c1")))
    }

    #[test]
    fn test_phase_order_edges() {
        let ws = Workspace::new("W").project(Project::new("P").target(two_phase_target("A")));
        let graph = GraphBuilder::default().build(&BuildRequest::new(ws)).unwrap();

        assert_eq!(graph.node_count(), 3);
        assert_eq!(
            graph.edge(&id("P::A/0-Headers/0"), &id("P::A/1-Sources/0")),
            Some(&EdgeKind::PhaseOrder)
        );
        assert_eq!(
            graph.edge(&id("P::A/0-Headers/1"), &id("P::A/1-Sources/0")),
            Some(&EdgeKind::PhaseOrder)
        );
        let info = graph.target(&TargetId::new("P", "A")).unwrap();
        assert_eq!(info.entries, vec![id("P::A/0-Headers/0"), id("P::A/0-Headers/1")]);
        assert_eq!(info.terminals, vec![id("P::A/1-Sources/0")]);
    }

    #[test]
    fn test_virtual_output_creates_data_edge_across_targets() {
        let ws = Workspace::new("W").project(
            Project::new("P")
                .target(Target::new("Tool").phase(
                    Phase::new("Run").item(
                        WorkItem::gate("stamp").output(Artifact::virtual_output("tool-done")),
                    ),
                ))
                .target(Target::new("Pkg").phase(
                    Phase::new("Post").item(cc("pkg").input(Artifact::virtual_output("tool-done"))),
                )),
        );
        let graph = GraphBuilder::default().build(&BuildRequest::new(ws)).unwrap();

        assert_eq!(
            graph.edge(&id("P::Tool/0-Run/0"), &id("P::Pkg/0-Post/0")),
            Some(&EdgeKind::Data(Artifact::virtual_output("tool-done")))
        );
        assert_eq!(graph.node(&id("P::Tool/0-Run/0")).unwrap().kind, "Gate");
    }

    #[test]
    fn test_target_dependency_links_terminals_to_entries() {
        let ws = Workspace::new("W").project(
            Project::new("P")
                .target(two_phase_target("A"))
                .target(two_phase_target("B").depends_on("A")),
        );
        let graph = GraphBuilder::default().build(&BuildRequest::new(ws)).unwrap();

        for entry in ["P::B/0-Headers/0", "P::B/0-Headers/1"] {
            assert_eq!(
                graph.edge(&id("P::A/1-Sources/0"), &id(entry)),
                Some(&EdgeKind::TargetDependency)
            );
        }
        assert!(graph.reaches(&id("P::A/0-Headers/0"), &id("P::B/1-Sources/0")));
        assert!(!graph.reaches(&id("P::B/0-Headers/0"), &id("P::A/1-Sources/0")));
    }

    #[test]
    fn test_empty_target_is_transparent() {
        let ws = Workspace::new("W").project(
            Project::new("P")
                .target(two_phase_target("A"))
                .target(Target::new("Aggregate").depends_on("A"))
                .target(two_phase_target("B").depends_on("Aggregate")),
        );
        let graph = GraphBuilder::default().build(&BuildRequest::new(ws)).unwrap();
        assert!(graph.reaches(&id("P::A/1-Sources/0"), &id("P::B/0-Headers/0")));
    }

    #[test]
    fn test_ambiguous_producer() {
        let out = Artifact::file("/build/out.o");
        let ws = Workspace::new("W").project(
            Project::new("P")
                .target(Target::new("A").phase(Phase::new("S").item(cc("a").output(out.clone()))))
                .target(Target::new("B").phase(Phase::new("S").item(cc("b").output(out.clone())))),
        );
        let err = GraphBuilder::default().build(&BuildRequest::new(ws)).unwrap_err();
        assert_eq!(
            err,
            GraphConstructionError::AmbiguousProducer {
                artifact: out,
                producers: vec![id("P::A/0-S/0"), id("P::B/0-S/0")],
            }
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let ws = Workspace::new("W")
            .project(Project::new("P").target(two_phase_target("A").depends_on("Missing")));
        let err = GraphBuilder::default().build(&BuildRequest::new(ws)).unwrap_err();
        assert_eq!(
            err,
            GraphConstructionError::UnknownTarget {
                target: TargetRef::local("Missing"),
                referenced_by: TargetId::new("P", "A"),
            }
        );
    }

    #[test]
    fn test_duplicate_target() {
        let ws = Workspace::new("W").project(
            Project::new("P")
                .target(two_phase_target("A"))
                .target(two_phase_target("A")),
        );
        let err = GraphBuilder::default().build(&BuildRequest::new(ws)).unwrap_err();
        assert!(matches!(err, GraphConstructionError::DuplicateTarget { .. }));
    }

    #[test]
    fn test_unknown_tool() {
        let ws = Workspace::new("W").project(Project::new("P").target(
            Target::new("A").phase(Phase::new("S").item(cc("sign").with_tool("CodeSign"))),
        ));
        let err = GraphBuilder::default().build(&BuildRequest::new(ws)).unwrap_err();
        assert_eq!(
            err,
            GraphConstructionError::UnknownTool {
                node: id("P::A/0-S/0"),
                tool: "CodeSign".into(),
            }
        );
    }

    #[test]
    fn test_registered_tool_sets_kind() {
        let registry = Arc::new(ActionRegistry::new().with("CodeSign", Arc::new(GateAction)));
        let ws = Workspace::new("W").project(Project::new("P").target(
            Target::new("A").phase(Phase::new("S").item(cc("sign").with_tool("CodeSign"))),
        ));
        let graph = GraphBuilder::new(registry).build(&BuildRequest::new(ws)).unwrap();
        assert_eq!(graph.node(&id("P::A/0-S/0")).unwrap().kind, "Gate");
    }

    #[test]
    fn test_project_scope_ignores_cross_project_dependency() {
        let ws = Workspace::new("W")
            .project(Project::new("Lib").target(two_phase_target("Core")))
            .project(Project::new("App").target(two_phase_target("Main").depends_on("Lib::Core")));

        let workspace_graph = GraphBuilder::default()
            .build(&BuildRequest::new(ws.clone()))
            .unwrap();
        assert!(workspace_graph.reaches(&id("Lib::Core/1-Sources/0"), &id("App::Main/0-Headers/0")));

        let project_graph = GraphBuilder::default()
            .build(&BuildRequest::new(ws).with_scope(DependencyScope::Project))
            .unwrap();
        assert!(!project_graph.reaches(&id("Lib::Core/1-Sources/0"), &id("App::Main/0-Headers/0")));
        assert!(project_graph
            .notes()
            .iter()
            .any(|n| n.message.contains("was not honored")));
    }

    #[test]
    fn test_serial_targets_follow_dependency_order() {
        let ws = Workspace::new("W").project(
            Project::new("P")
                .target(two_phase_target("B").depends_on("A"))
                .target(two_phase_target("A"))
                .target(two_phase_target("C")),
        );
        let graph = GraphBuilder::default()
            .build(&BuildRequest::new(ws).with_parallel_targets(false))
            .unwrap();

        let order: Vec<String> = graph.targets().iter().map(|t| t.id.name.clone()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
        assert_eq!(
            graph.edge(&id("P::B/1-Sources/0"), &id("P::C/0-Headers/0")),
            Some(&EdgeKind::SerialTargetOrder)
        );
        assert!(graph
            .notes()
            .iter()
            .any(|n| n.message == "Building targets in dependency order"));
    }

    #[test]
    fn test_requested_targets_include_dependencies() {
        let ws = Workspace::new("W").project(
            Project::new("P")
                .target(two_phase_target("A"))
                .target(two_phase_target("B").depends_on("A"))
                .target(two_phase_target("C")),
        );
        let graph = GraphBuilder::default()
            .build(&BuildRequest::new(ws).with_target("B"))
            .unwrap();
        let targets: Vec<String> = graph.targets().iter().map(|t| t.id.name.clone()).collect();
        assert_eq!(targets, vec!["A", "B"]);
        assert_eq!(graph.node_count(), 6);
    }

    #[test]
    fn test_unknown_requested_target() {
        let ws = Workspace::new("W").project(Project::new("P").target(two_phase_target("A")));
        let err = GraphBuilder::default()
            .build(&BuildRequest::new(ws).with_target("Nope"))
            .unwrap_err();
        assert!(matches!(err, GraphConstructionError::UnknownRequestedTarget { .. }));
    }
}
