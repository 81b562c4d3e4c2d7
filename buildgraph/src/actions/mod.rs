//! Task actions: the capability every node exposes to the scheduler.
//!
//! Built-in tool steps and opaque custom tasks both implement [`TaskAction`],
//! so the scheduler never special-cases task kind. Tools are looked up by
//! name in an [`ActionRegistry`] when the graph is built; work items without
//! a tool run their command as a process.

mod classify;
mod process;

pub use classify::{OutputClassifier, RegexOutputClassifier};
pub use process::{CustomTaskSpec, ProcessAction};

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::core::Diagnostic;
use crate::graph::TaskNode;

/// Context handed to an action when its node is dispatched.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    /// The node being executed.
    pub node: &'a TaskNode,
}

impl<'a> ActionContext<'a> {
    /// Creates a context for a node.
    #[must_use]
    pub fn new(node: &'a TaskNode) -> Self {
        Self { node }
    }
}

/// The result of running an action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Whether the work succeeded.
    pub success: bool,
    /// Process exit code, when a process ran.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Diagnostics produced directly by the action.
    pub diagnostics: Vec<Diagnostic>,
    /// Failure reason.
    pub error: Option<String>,
}

impl ActionOutcome {
    /// Creates a successful outcome.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Attaches captured output.
    #[must_use]
    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        self
    }

    /// Sets the exit code.
    #[must_use]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Adds a diagnostic.
    #[must_use]
    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }
}

/// The capability interface every task node's work implements.
#[async_trait]
pub trait TaskAction: Send + Sync + Debug {
    /// Short kind name, e.g. `Gate`, `Process`, or a tool name.
    ///
    /// The kind participates in the node fingerprint.
    fn kind(&self) -> &str;

    /// Runs the work for one node.
    async fn execute(&self, ctx: &ActionContext<'_>) -> ActionOutcome;
}

/// A no-op action used by gate nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateAction;

#[async_trait]
impl TaskAction for GateAction {
    fn kind(&self) -> &str {
        "Gate"
    }

    async fn execute(&self, _ctx: &ActionContext<'_>) -> ActionOutcome {
        ActionOutcome::ok()
    }
}

/// A synchronous function-based action.
pub struct FnAction<F>
where
    F: Fn(&ActionContext<'_>) -> ActionOutcome + Send + Sync,
{
    kind: String,
    func: F,
}

impl<F> FnAction<F>
where
    F: Fn(&ActionContext<'_>) -> ActionOutcome + Send + Sync,
{
    /// Creates a new function-based action.
    pub fn new(kind: impl Into<String>, func: F) -> Self {
        Self {
            kind: kind.into(),
            func,
        }
    }
}

impl<F> Debug for FnAction<F>
where
    F: Fn(&ActionContext<'_>) -> ActionOutcome + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAction").field("kind", &self.kind).finish()
    }
}

#[async_trait]
impl<F> TaskAction for FnAction<F>
where
    F: Fn(&ActionContext<'_>) -> ActionOutcome + Send + Sync,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> ActionOutcome {
        (self.func)(ctx)
    }
}

/// Registry of tool actions, keyed by tool name.
#[derive(Default)]
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, Arc<dyn TaskAction>>>,
}

impl ActionRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action for a tool name, replacing any previous one.
    pub fn register(&self, tool: impl Into<String>, action: Arc<dyn TaskAction>) {
        self.actions.write().insert(tool.into(), action);
    }

    /// Registers an action and returns the registry, for chaining.
    #[must_use]
    pub fn with(self, tool: impl Into<String>, action: Arc<dyn TaskAction>) -> Self {
        self.register(tool, action);
        self
    }

    /// Looks up the action for a tool.
    #[must_use]
    pub fn get(&self, tool: &str) -> Option<Arc<dyn TaskAction>> {
        self.actions.read().get(tool).cloned()
    }

    /// Returns true if the tool is registered.
    #[must_use]
    pub fn contains(&self, tool: &str) -> bool {
        self.actions.read().contains_key(tool)
    }

    /// Lists registered tool names, sorted.
    #[must_use]
    pub fn tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = self.actions.read().keys().cloned().collect();
        tools.sort();
        tools
    }
}

impl Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("tools", &self.tools())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = ActionRegistry::new()
            .with("CpHeader", Arc::new(GateAction))
            .with("Ld", Arc::new(FnAction::new("Ld", |_| ActionOutcome::ok())));

        assert!(registry.contains("CpHeader"));
        assert!(!registry.contains("CodeSign"));
        assert_eq!(registry.get("Ld").map(|a| a.kind().to_string()), Some("Ld".into()));
        assert_eq!(registry.tools(), vec!["CpHeader", "Ld"]);
    }

    #[test]
    fn test_outcome_builders() {
        let outcome = ActionOutcome::fail("exit 1")
            .with_exit_code(1)
            .with_output("", "error: boom");
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(1));
        assert_eq!(outcome.error.as_deref(), Some("exit 1"));
        assert!(ActionOutcome::ok().success);
    }
}
