//! Task nodes.

use std::sync::Arc;

use crate::actions::TaskAction;
use crate::core::{Artifact, CommandSpec, NodeId, TargetId};
use crate::model::WorkItem;

/// A unit of schedulable work with declared inputs and outputs.
///
/// Nodes are owned by the [`TaskGraph`](super::TaskGraph) that created them.
/// Execution state lives in the scheduler's report, not on the node.
#[derive(Debug, Clone)]
pub struct TaskNode {
    /// Stable identity.
    pub id: NodeId,
    /// Owning target.
    pub target: TargetId,
    /// Position of the owning phase in its target.
    pub phase_index: usize,
    /// Work item name, used in messages.
    pub name: String,
    /// Action kind, e.g. `Process`, `Gate`, or a tool name.
    pub kind: String,
    /// Command to run.
    pub command: CommandSpec,
    /// Declared inputs.
    pub inputs: Vec<Artifact>,
    /// Declared outputs.
    pub outputs: Vec<Artifact>,
    /// Human-readable execution description.
    pub description: Option<String>,
    /// Whether the inherited environment is cleared before running.
    pub sandboxed: bool,
    /// Carried for indexing preparation; affects fingerprints only.
    pub affects_indexing: bool,
    /// Runs on every build.
    pub always_out_of_date: bool,
    /// The work itself.
    pub action: Arc<dyn TaskAction>,
}

impl TaskNode {
    /// Creates a node from a work item and its resolved action.
    #[must_use]
    pub fn from_work_item(
        id: NodeId,
        target: TargetId,
        phase_index: usize,
        item: WorkItem,
        action: Arc<dyn TaskAction>,
    ) -> Self {
        Self {
            id,
            target,
            phase_index,
            kind: action.kind().to_string(),
            name: item.name,
            command: item.command,
            inputs: item.inputs,
            outputs: item.outputs,
            description: item.description,
            sandboxed: item.sandboxed,
            affects_indexing: item.affects_indexing,
            always_out_of_date: item.always_out_of_date,
            action,
        }
    }

    /// Returns the description used in logs: the declared description, or
    /// the kind and name.
    #[must_use]
    pub fn display_description(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.kind, self.name))
    }
}
