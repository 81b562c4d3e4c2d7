//! Test actions.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::actions::{ActionContext, ActionOutcome, TaskAction};
use crate::core::{Artifact, NodeId};

/// What a [`RecordingAction`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedPhase {
    /// The action was entered.
    Started,
    /// The action returned.
    Finished,
}

/// One entry of a [`RecordingAction`] log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// The node.
    pub node: NodeId,
    /// Start or finish.
    pub phase: RecordedPhase,
}

/// An action that logs every execution and writes the node's declared file
/// outputs.
///
/// Output content is derived from the command line and the contents of the
/// file inputs, so changing either changes the outputs. A fixed content can
/// be configured instead to exercise early cutoff.
#[derive(Debug, Default)]
pub struct RecordingAction {
    log: Mutex<Vec<RecordedEvent>>,
    delays: Mutex<BTreeMap<String, Duration>>,
    fixed_content: Option<String>,
}

impl RecordingAction {
    /// Creates a new recording action.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the same content to every output, whatever the inputs.
    #[must_use]
    pub fn with_fixed_content(mut self, content: impl Into<String>) -> Self {
        self.fixed_content = Some(content.into());
        self
    }

    /// Delays nodes whose work item name matches.
    #[must_use]
    pub fn with_delay(self, name: impl Into<String>, delay: Duration) -> Self {
        self.delays.lock().insert(name.into(), delay);
        self
    }

    /// Returns the full start/finish log.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.log.lock().clone()
    }

    /// Returns executed nodes in start order.
    #[must_use]
    pub fn executions(&self) -> Vec<NodeId> {
        self.log
            .lock()
            .iter()
            .filter(|e| e.phase == RecordedPhase::Started)
            .map(|e| e.node.clone())
            .collect()
    }

    /// Returns the number of executions.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.executions().len()
    }

    /// Returns how many times nodes whose identity contains `pattern` ran.
    #[must_use]
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.executions()
            .iter()
            .filter(|id| id.as_str().contains(pattern))
            .count()
    }

    /// Returns true if every node matching `first` finished before any node
    /// matching `second` started. Both must have run.
    #[must_use]
    pub fn finished_before_started(&self, first: &str, second: &str) -> bool {
        let log = self.log.lock();
        let last_finish = log
            .iter()
            .rposition(|e| e.phase == RecordedPhase::Finished && e.node.as_str().contains(first));
        let first_start = log
            .iter()
            .position(|e| e.phase == RecordedPhase::Started && e.node.as_str().contains(second));
        matches!((last_finish, first_start), (Some(f), Some(s)) if f < s)
    }

    /// Clears the log.
    pub fn clear(&self) {
        self.log.lock().clear();
    }

    fn push(&self, node: &NodeId, phase: RecordedPhase) {
        self.log.lock().push(RecordedEvent {
            node: node.clone(),
            phase,
        });
    }

    async fn content_for(&self, ctx: &ActionContext<'_>) -> String {
        if let Some(fixed) = &self.fixed_content {
            return fixed.clone();
        }
        let command = &ctx.node.command;
        let mut content = format!("{} {}\n", command.executable, command.arguments.join(" "));
        for input in &ctx.node.inputs {
            if let Artifact::File(path) = input {
                if let Ok(text) = tokio::fs::read_to_string(path).await {
                    content.push_str(&text);
                }
            }
        }
        content
    }
}

#[async_trait]
impl TaskAction for RecordingAction {
    fn kind(&self) -> &str {
        "Record"
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> ActionOutcome {
        let node = ctx.node;
        self.push(&node.id, RecordedPhase::Started);

        let delay = self.delays.lock().get(&node.name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let content = self.content_for(ctx).await;
        for output in &node.outputs {
            let Artifact::File(path) = output else {
                continue;
            };
            if let Some(parent) = path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    self.push(&node.id, RecordedPhase::Finished);
                    return ActionOutcome::fail(format!("unable to create '{}': {e}", parent.display()));
                }
            }
            if let Err(e) = tokio::fs::write(path, &content).await {
                self.push(&node.id, RecordedPhase::Finished);
                return ActionOutcome::fail(format!("unable to write '{}': {e}", path.display()));
            }
        }

        self.push(&node.id, RecordedPhase::Finished);
        ActionOutcome::ok()
    }
}

/// An action that always fails.
#[derive(Debug)]
pub struct FailingAction {
    error: String,
    stderr: String,
    calls: Mutex<usize>,
}

impl FailingAction {
    /// Creates a failing action with a reason.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            stderr: String::new(),
            calls: Mutex::new(0),
        }
    }

    /// Also reports captured standard error.
    #[must_use]
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    /// Returns how many times the action ran.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl TaskAction for FailingAction {
    fn kind(&self) -> &str {
        "Fail"
    }

    async fn execute(&self, _ctx: &ActionContext<'_>) -> ActionOutcome {
        *self.calls.lock() += 1;
        ActionOutcome::fail(&self.error)
            .with_output("", &self.stderr)
            .with_exit_code(1)
    }
}
