//! Execution reports.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::core::{Diagnostic, NodeId, NodeStatus, Severity, TargetId};
use crate::fingerprint::Signature;

/// Outcome of one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    /// The node.
    pub id: NodeId,
    /// Owning target.
    pub target: TargetId,
    /// Work item name.
    pub name: String,
    /// Terminal status.
    pub status: NodeStatus,
    /// Diagnostics attributed to the node.
    pub diagnostics: Vec<Diagnostic>,
    /// Process exit code, when a process ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time spent on the node in milliseconds.
    pub duration_ms: f64,
}

impl NodeReport {
    pub(crate) fn new(id: NodeId, target: TargetId, name: String, status: NodeStatus) -> Self {
        Self {
            id,
            target,
            name,
            status,
            diagnostics: Vec::new(),
            exit_code: None,
            error: None,
            duration_ms: 0.0,
        }
    }
}

/// Result of executing a task graph.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    /// Build description signature, when produced by a build operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    /// Per-node outcomes.
    pub nodes: BTreeMap<NodeId, NodeReport>,
    /// Node diagnostics in the order they were produced.
    pub diagnostics: Vec<Diagnostic>,
    /// Build-level notes, such as the description signature and path.
    pub notes: Vec<Diagnostic>,
    /// Nodes in the order they were dispatched to their action.
    pub dispatch_order: Vec<NodeId>,
    /// Cancellation reason, if dispatch was stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<String>,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    pub finished_at: DateTime<Utc>,
}

impl ExecutionReport {
    pub(crate) fn new() -> Self {
        let now = Utc::now();
        Self {
            signature: None,
            nodes: BTreeMap::new(),
            diagnostics: Vec::new(),
            notes: Vec::new(),
            dispatch_order: Vec::new(),
            stopped: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// Returns the status of a node.
    #[must_use]
    pub fn status(&self, id: &NodeId) -> Option<NodeStatus> {
        self.nodes.get(id).map(|n| n.status)
    }

    /// Returns the status of the node whose identity is `raw`.
    #[must_use]
    pub fn status_of(&self, raw: &str) -> Option<NodeStatus> {
        self.status(&NodeId::from_raw(raw))
    }

    fn with_status(&self, pred: impl Fn(NodeStatus) -> bool) -> Vec<&NodeId> {
        self.nodes
            .values()
            .filter(|n| pred(n.status))
            .map(|n| &n.id)
            .collect()
    }

    /// Nodes whose action was invoked.
    #[must_use]
    pub fn ran(&self) -> Vec<&NodeId> {
        self.with_status(|s| s.ran())
    }

    /// Nodes skipped because they were up to date.
    #[must_use]
    pub fn up_to_date(&self) -> Vec<&NodeId> {
        self.with_status(|s| s == NodeStatus::SkippedUpToDate)
    }

    /// Nodes skipped for any reason.
    #[must_use]
    pub fn skipped(&self) -> Vec<&NodeId> {
        self.with_status(|s| s.is_skipped())
    }

    /// Nodes that failed.
    #[must_use]
    pub fn failed(&self) -> Vec<&NodeId> {
        self.with_status(|s| s == NodeStatus::Failed)
    }

    /// Nodes never evaluated.
    #[must_use]
    pub fn not_evaluated(&self) -> Vec<&NodeId> {
        self.with_status(|s| s == NodeStatus::NotEvaluated)
    }

    /// Counts nodes with a status.
    #[must_use]
    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.values().filter(|n| n.status == status).count()
    }

    /// Returns true if every node was up to date and nothing was reported.
    #[must_use]
    pub fn is_null_build(&self) -> bool {
        self.nodes
            .values()
            .all(|n| n.status == NodeStatus::SkippedUpToDate)
            && self.diagnostics.is_empty()
    }

    /// Returns true if no node failed and every node reached a successful
    /// state.
    #[must_use]
    pub fn success(&self) -> bool {
        self.stopped.is_none() && self.nodes.values().all(|n| n.status.is_success())
    }

    /// Returns error diagnostics.
    #[must_use]
    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect()
    }

    /// Execution wall time in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// One-line summary for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed, {} up to date, {} skipped after failures, {} not evaluated",
            self.count(NodeStatus::Succeeded),
            self.count(NodeStatus::Failed),
            self.count(NodeStatus::SkippedUpToDate),
            self.count(NodeStatus::SkippedUpstreamFailure),
            self.count(NodeStatus::NotEvaluated),
        )
    }
}
