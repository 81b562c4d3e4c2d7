//! Error types for the build graph engine.
//!
//! Graph construction and ordering errors are fatal and surface before any
//! node runs. Node execution errors stay local to the failing node. State
//! store corruption is recovered by treating the affected nodes as cache
//! misses and is never a build failure by itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::{Artifact, NodeId, TargetId, TargetRef};

/// The main error type for engine operations.
#[derive(Debug, Error)]
pub enum BuildGraphError {
    /// The project model could not be turned into a task graph.
    #[error("{0}")]
    GraphConstruction(#[from] GraphConstructionError),

    /// The task graph contains a dependency cycle.
    #[error("{0}")]
    Ordering(#[from] OrderingError),

    /// A node failed to execute.
    #[error("{0}")]
    NodeExecution(#[from] NodeExecutionError),

    /// The incremental state store failed.
    #[error("{0}")]
    StateStore(#[from] StateStoreError),

    /// A fingerprint could not be computed.
    #[error("{0}")]
    Fingerprint(#[from] FingerprintError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The build was cancelled.
    #[error("Build cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for BuildGraphError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata attached to user-facing errors for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DiagnosticInfo {
    /// Error code (e.g., "GRAPH-001-AMBIGUOUS_PRODUCER").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl DiagnosticInfo {
    /// Creates a new diagnostic info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised while turning targets into a task graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphConstructionError {
    /// Two nodes declare the same output.
    #[error("Multiple commands produce '{artifact}': {}", .producers.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    AmbiguousProducer {
        /// The contested output.
        artifact: Artifact,
        /// Every node declaring it.
        producers: Vec<NodeId>,
    },

    /// A dependency names a target that does not exist.
    #[error("Target '{referenced_by}' depends on unknown target '{target}'")]
    UnknownTarget {
        /// The unresolved reference.
        target: TargetRef,
        /// The declaring target.
        referenced_by: TargetId,
    },

    /// Two targets share the same identity.
    #[error("Duplicate target '{target}'")]
    DuplicateTarget {
        /// The duplicated identity.
        target: TargetId,
    },

    /// A work item names a tool with no registered action.
    #[error("Task '{node}' uses unknown tool '{tool}'")]
    UnknownTool {
        /// The node.
        node: NodeId,
        /// The tool name.
        tool: String,
    },

    /// The build request names a target that does not exist.
    #[error("Requested target '{target}' does not exist")]
    UnknownRequestedTarget {
        /// The unresolved reference.
        target: TargetRef,
    },
}

impl GraphConstructionError {
    /// Returns structured diagnostic metadata.
    #[must_use]
    pub fn info(&self) -> DiagnosticInfo {
        match self {
            Self::AmbiguousProducer { artifact, .. } => DiagnosticInfo::new(
                "GRAPH-001-AMBIGUOUS_PRODUCER",
                format!("Output '{artifact}' has more than one producer"),
            )
            .with_fix_hint("Declare each output in exactly one task."),
            Self::UnknownTarget { target, referenced_by } => DiagnosticInfo::new(
                "GRAPH-002-UNKNOWN_TARGET",
                format!("Dependency '{target}' not found"),
            )
            .with_context_entry("target", referenced_by.to_string())
            .with_fix_hint("Check the dependency for typos or add the missing target."),
            Self::DuplicateTarget { target } => DiagnosticInfo::new(
                "GRAPH-003-DUPLICATE_TARGET",
                format!("Target '{target}' is declared twice"),
            ),
            Self::UnknownTool { tool, .. } => DiagnosticInfo::new(
                "GRAPH-004-UNKNOWN_TOOL",
                format!("No action registered for tool '{tool}'"),
            )
            .with_fix_hint("Register the tool in the action registry before planning."),
            Self::UnknownRequestedTarget { target } => DiagnosticInfo::new(
                "GRAPH-005-UNKNOWN_REQUESTED_TARGET",
                format!("Requested target '{target}' not found"),
            ),
        }
    }
}

/// One structurally distinguishable dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCycle {
    /// Nodes on the cycle, in edge order; the first node closes the cycle.
    pub participants: Vec<NodeId>,
    /// Targets involved, in cycle order, without repeats.
    pub targets: Vec<TargetId>,
    /// Human-readable description.
    pub message: String,
}

/// Error raised when the task graph cannot be ordered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}", .cycles.iter().map(|c| c.message.as_str()).collect::<Vec<_>>().join("\n"))]
pub struct OrderingError {
    /// Every cycle found, one diagnostic each.
    pub cycles: Vec<DependencyCycle>,
}

impl OrderingError {
    /// Returns every node that participates in any cycle.
    #[must_use]
    pub fn participants(&self) -> Vec<NodeId> {
        let mut all: Vec<NodeId> = self
            .cycles
            .iter()
            .flat_map(|c| c.participants.iter().cloned())
            .collect();
        all.sort();
        all.dedup();
        all
    }

    /// Returns structured diagnostic metadata.
    #[must_use]
    pub fn info(&self) -> DiagnosticInfo {
        DiagnosticInfo::new(
            "ORDER-001-CYCLE",
            format!("Task graph contains {} dependency cycle(s)", self.cycles.len()),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.")
    }
}

/// Error raised when a node's underlying work fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Task '{node}' failed: {reason}")]
pub struct NodeExecutionError {
    /// The failing node.
    pub node: NodeId,
    /// Failure reason.
    pub reason: String,
    /// Exit code, when a process ran.
    pub exit_code: Option<i32>,
}

impl NodeExecutionError {
    /// Creates a new node execution error.
    #[must_use]
    pub fn new(node: NodeId, reason: impl Into<String>) -> Self {
        Self {
            node,
            reason: reason.into(),
            exit_code: None,
        }
    }

    /// Sets the exit code.
    #[must_use]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }
}

/// Errors from the incremental state store.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// Persisted state could not be read or written.
    #[error("State store I/O error at '{}': {source}", path.display())]
    Io {
        /// The journal path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded.
    #[error("State store encoding error: {0}")]
    Encoding(String),
}

/// Errors raised while fingerprinting a node.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// A declared input does not exist at evaluation time.
    #[error("Build input file cannot be found: '{}'", path.display())]
    MissingInput {
        /// The missing path.
        path: PathBuf,
    },

    /// An input could not be read.
    #[error("Unable to read '{}': {source}", path.display())]
    Io {
        /// The unreadable path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Provides default suggestions for common diagnostic codes.
pub struct DiagnosticSuggestions;

impl DiagnosticSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "GRAPH-001-AMBIGUOUS_PRODUCER" => Some(
                "Two tasks write the same file. Rename one output or merge the tasks.",
            ),
            "GRAPH-002-UNKNOWN_TARGET" => Some(
                "Ensure all dependencies reference targets that exist in the workspace. \
                 Qualify cross-project references as 'project::target'.",
            ),
            "ORDER-001-CYCLE" => Some(
                "Check target dependencies and task inputs/outputs for circular references. \
                 A target that consumes another's output must not also be consumed by it.",
            ),
            "NODE-001-MISSING_INPUT" => Some(
                "Did you forget to declare this file as an output of a task that produces it, \
                 or to add a dependency on the target that builds it?",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_info_creation() {
        let info = DiagnosticInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("target", "App::Tool");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("target"), Some(&"App::Tool".to_string()));
    }

    #[test]
    fn test_ambiguous_producer_message() {
        let err = GraphConstructionError::AmbiguousProducer {
            artifact: Artifact::file("/out/a.o"),
            producers: vec![NodeId::from_raw("P::A/0-C/0"), NodeId::from_raw("P::B/0-C/0")],
        };
        assert_eq!(
            err.to_string(),
            "Multiple commands produce '/out/a.o': P::A/0-C/0, P::B/0-C/0"
        );
        assert_eq!(err.info().code, "GRAPH-001-AMBIGUOUS_PRODUCER");
    }

    #[test]
    fn test_ordering_error_participants_are_deduplicated() {
        let a = NodeId::from_raw("a");
        let b = NodeId::from_raw("b");
        let err = OrderingError {
            cycles: vec![
                DependencyCycle {
                    participants: vec![b.clone(), a.clone()],
                    targets: vec![],
                    message: "first".into(),
                },
                DependencyCycle {
                    participants: vec![a.clone()],
                    targets: vec![],
                    message: "second".into(),
                },
            ],
        };
        assert_eq!(err.participants(), vec![a, b]);
        assert_eq!(err.to_string(), "first\nsecond");
    }

    #[test]
    fn test_missing_input_message() {
        let err = FingerprintError::MissingInput {
            path: PathBuf::from("/build/include/foo.h"),
        };
        assert_eq!(
            err.to_string(),
            "Build input file cannot be found: '/build/include/foo.h'"
        );
    }

    #[test]
    fn test_suggestions() {
        assert!(DiagnosticSuggestions::get("ORDER-001-CYCLE").is_some());
        assert!(DiagnosticSuggestions::get("UNKNOWN").is_none());
    }
}
