//! Task graph construction and validation.
//!
//! This module provides:
//! - The arena-backed [`TaskGraph`] owned by one build invocation
//! - [`GraphBuilder`], which expands targets and phases into nodes and edges
//! - [`validate`], which rejects structural cycles and yields a
//!   [`ValidatedGraph`] that can no longer be mutated

mod builder;
mod node;
mod validate;

pub use builder::GraphBuilder;
pub use node::TaskNode;
pub use validate::{validate, ValidatedGraph};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::BTreeMap;
use std::fmt;

use crate::core::{Artifact, Diagnostic, NodeId, TargetId};
use crate::model::DependencyScope;

/// Why one node must finish before another starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Later phase of the same target.
    PhaseOrder,
    /// The successor consumes an artifact the predecessor declares.
    Data(Artifact),
    /// Explicit target-level dependency.
    TargetDependency,
    /// Targets are built one at a time.
    SerialTargetOrder,
}

impl EdgeKind {
    /// Short stable label, used in the plan signature.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::PhaseOrder => "phase-order".to_string(),
            Self::Data(artifact) => format!("data:{artifact}"),
            Self::TargetDependency => "target-dependency".to_string(),
            Self::SerialTargetOrder => "serial-target-order".to_string(),
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PhaseOrder => write!(f, "build phase order"),
            Self::Data(artifact) => write!(f, "consumes '{artifact}'"),
            Self::TargetDependency => write!(f, "explicit target dependency"),
            Self::SerialTargetOrder => write!(f, "serial target order"),
        }
    }
}

/// Per-target view of the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    /// The target.
    pub id: TargetId,
    /// Every node of the target, in phase order.
    pub nodes: Vec<NodeId>,
    /// Nodes with no predecessor inside the target.
    pub entries: Vec<NodeId>,
    /// Nodes with no successor inside the target.
    pub terminals: Vec<NodeId>,
    /// Explicit dependencies that were honored.
    pub dependencies: Vec<TargetId>,
}

impl TargetInfo {
    /// Returns true if the target expanded to no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// The node and edge set of one build invocation.
///
/// Nodes live in an arena indexed by stable [`NodeId`]s so that persisted
/// state can be looked up independently of the graph's lifetime.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    name: String,
    graph: DiGraph<TaskNode, EdgeKind>,
    index: BTreeMap<NodeId, NodeIndex>,
    targets: Vec<TargetInfo>,
    scope: DependencyScope,
    parallelize_targets: bool,
    settings: BTreeMap<String, String>,
    notes: Vec<Diagnostic>,
}

impl TaskGraph {
    pub(crate) fn new(
        name: impl Into<String>,
        scope: DependencyScope,
        parallelize_targets: bool,
        settings: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            graph: DiGraph::new(),
            index: BTreeMap::new(),
            targets: Vec::new(),
            scope,
            parallelize_targets,
            settings,
            notes: Vec::new(),
        }
    }

    pub(crate) fn add_node(&mut self, node: TaskNode) -> NodeIndex {
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(id, idx);
        idx
    }

    /// Adds an edge unless one already links the pair. Returns true if added.
    pub(crate) fn add_edge(&mut self, from: &NodeId, to: &NodeId, kind: EdgeKind) -> bool {
        let (Some(&a), Some(&b)) = (self.index.get(from), self.index.get(to)) else {
            return false;
        };
        if self.graph.find_edge(a, b).is_some() {
            return false;
        }
        self.graph.add_edge(a, b, kind);
        true
    }

    pub(crate) fn push_target(&mut self, info: TargetInfo) {
        self.targets.push(info);
    }

    pub(crate) fn push_note(&mut self, note: Diagnostic) {
        self.notes.push(note);
    }

    pub(crate) fn inner(&self) -> &DiGraph<TaskNode, EdgeKind> {
        &self.graph
    }

    pub(crate) fn index_of(&self, id: &NodeId) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    /// Returns the workspace name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the dependency scope the graph was built with.
    #[must_use]
    pub fn scope(&self) -> DependencyScope {
        self.scope
    }

    /// Returns true if independent targets may run concurrently.
    #[must_use]
    pub fn parallelize_targets(&self) -> bool {
        self.parallelize_targets
    }

    /// Returns the build settings.
    #[must_use]
    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }

    /// Returns notes recorded while building the graph.
    #[must_use]
    pub fn notes(&self) -> &[Diagnostic] {
        &self.notes
    }

    /// Returns per-target information in build order.
    #[must_use]
    pub fn targets(&self) -> &[TargetInfo] {
        &self.targets
    }

    /// Looks up a target.
    #[must_use]
    pub fn target(&self, id: &TargetId) -> Option<&TargetInfo> {
        self.targets.iter().find(|t| &t.id == id)
    }

    /// Iterates over nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.graph.node_weights()
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&TaskNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    /// Returns true if the node exists.
    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Iterates over edges as `(from, to, kind)`.
    pub fn edges(&self) -> impl Iterator<Item = (&NodeId, &NodeId, &EdgeKind)> {
        self.graph.edge_references().map(|edge| {
            (
                &self.graph[edge.source()].id,
                &self.graph[edge.target()].id,
                edge.weight(),
            )
        })
    }

    /// Returns the kind of the edge between two nodes, if any.
    #[must_use]
    pub fn edge(&self, from: &NodeId, to: &NodeId) -> Option<&EdgeKind> {
        let a = self.index_of(from)?;
        let b = self.index_of(to)?;
        self.graph.find_edge(a, b).map(|e| &self.graph[e])
    }

    /// Returns the direct predecessors of a node, sorted.
    #[must_use]
    pub fn predecessors(&self, id: &NodeId) -> Vec<&NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Returns the direct successors of a node, sorted.
    #[must_use]
    pub fn successors(&self, id: &NodeId) -> Vec<&NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &NodeId, direction: Direction) -> Vec<&NodeId> {
        let Some(idx) = self.index_of(id) else {
            return Vec::new();
        };
        let mut ids: Vec<&NodeId> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| &self.graph[n].id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Returns true if `to` is reachable from `from`.
    #[must_use]
    pub fn reaches(&self, from: &NodeId, to: &NodeId) -> bool {
        match (self.index_of(from), self.index_of(to)) {
            (Some(a), Some(b)) => petgraph::algo::has_path_connecting(&self.graph, a, b, None),
            _ => false,
        }
    }
}
