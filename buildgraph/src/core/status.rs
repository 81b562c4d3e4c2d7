//! Task node status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution state of a task node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Node has not been evaluated yet.
    #[default]
    Pending,
    /// Node is currently running.
    Running,
    /// Node ran and succeeded.
    Succeeded,
    /// Node ran and failed.
    Failed,
    /// Node matched its persisted fingerprint and was not run.
    SkippedUpToDate,
    /// Node was not run because a transitive predecessor failed.
    SkippedUpstreamFailure,
    /// Node was never evaluated (stop-on-error, cancellation, or rejection).
    NotEvaluated,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::SkippedUpToDate => write!(f, "skipped-up-to-date"),
            Self::SkippedUpstreamFailure => write!(f, "skipped-due-to-upstream-failure"),
            Self::NotEvaluated => write!(f, "not-evaluated"),
        }
    }
}

impl NodeStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Returns true if the node's process or action was actually invoked.
    #[must_use]
    pub fn ran(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if the node was skipped for any reason.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::SkippedUpToDate | Self::SkippedUpstreamFailure)
    }

    /// Returns true if the status lets successors proceed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::SkippedUpToDate)
    }
}
