//! Build description manifests.
//!
//! A manifest is a serialized snapshot of the planned graph, stored under the
//! build root and named by its signature. Two builds of an unchanged project
//! resolve to the same manifest file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use crate::core::{Artifact, CommandSpec, NodeId, TargetId};
use crate::fingerprint::Signature;
use crate::graph::TaskGraph;
use crate::model::DependencyScope;

/// One planned node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribedNode {
    /// Node identity.
    pub id: NodeId,
    /// Owning target.
    pub target: TargetId,
    /// Action kind.
    pub kind: String,
    /// Work item name.
    pub name: String,
    /// Command line.
    pub command: CommandSpec,
    /// Declared inputs.
    pub inputs: Vec<Artifact>,
    /// Declared outputs.
    pub outputs: Vec<Artifact>,
    /// Whether the inherited environment is cleared.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sandboxed: bool,
    /// Whether the node runs on every build.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub always_out_of_date: bool,
}

/// One planned edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DescribedEdge {
    /// Upstream node.
    pub from: NodeId,
    /// Downstream node.
    pub to: NodeId,
    /// Edge label.
    pub kind: String,
}

/// A serialized build description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDescription {
    /// Signature the manifest is named by.
    pub signature: Signature,
    /// Workspace name.
    pub name: String,
    /// Dependency scope the graph was built with.
    pub scope: DependencyScope,
    /// Whether targets were allowed to build concurrently.
    pub parallelize_targets: bool,
    /// Build settings.
    pub settings: BTreeMap<String, String>,
    /// Nodes of each target, keyed by target identity.
    pub targets: BTreeMap<String, Vec<NodeId>>,
    /// Every node, sorted by identity.
    pub nodes: Vec<DescribedNode>,
    /// Every edge, sorted.
    pub edges: Vec<DescribedEdge>,
}

impl BuildDescription {
    /// Describes a planned graph.
    #[must_use]
    pub fn from_graph(graph: &TaskGraph, signature: Signature) -> Self {
        let mut nodes: Vec<DescribedNode> = graph
            .nodes()
            .map(|node| DescribedNode {
                id: node.id.clone(),
                target: node.target.clone(),
                kind: node.kind.clone(),
                name: node.name.clone(),
                command: node.command.clone(),
                inputs: node.inputs.clone(),
                outputs: node.outputs.clone(),
                sandboxed: node.sandboxed,
                always_out_of_date: node.always_out_of_date,
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut edges: Vec<DescribedEdge> = graph
            .edges()
            .map(|(from, to, kind)| DescribedEdge {
                from: from.clone(),
                to: to.clone(),
                kind: kind.label(),
            })
            .collect();
        edges.sort();

        Self {
            signature,
            name: graph.name().to_string(),
            scope: graph.scope(),
            parallelize_targets: graph.parallelize_targets(),
            settings: graph.settings().clone(),
            targets: graph
                .targets()
                .iter()
                .map(|t| (t.id.to_string(), t.nodes.clone()))
                .collect(),
            nodes,
            edges,
        }
    }

    /// Writes the manifest unless a file with the same name already exists.
    ///
    /// Returns true if the file was written.
    pub async fn write_if_absent(&self, path: &Path) -> io::Result<bool> {
        if tokio::fs::try_exists(path).await? {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(true)
    }

    /// Reads a manifest back.
    pub async fn read(path: &Path) -> io::Result<Self> {
        let raw = tokio::fs::read(path).await?;
        serde_json::from_slice(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
