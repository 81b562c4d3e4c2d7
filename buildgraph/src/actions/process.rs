//! Custom task adapter: runs an opaque, user-declared process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::{ActionContext, ActionOutcome, TaskAction};
use crate::core::{Artifact, CommandSpec};
use crate::errors::BuildGraphError;
use crate::model::WorkItem;

/// Runs a node's command as a child process, capturing its output.
///
/// The adapter's contract stops at running the declared process with the
/// declared environment and surfacing raw output and exit status;
/// classifying that output into diagnostics happens elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessAction;

impl ProcessAction {
    fn prepare(command: &CommandSpec, sandboxed: bool) -> Command {
        let mut cmd = Command::new(&command.executable);
        cmd.args(&command.arguments);

        if sandboxed {
            // Only the declared environment reaches the child; PATH is kept
            // so bare executable names still resolve.
            cmd.env_clear();
            if let Some(path) = std::env::var_os("PATH") {
                cmd.env("PATH", path);
            }
        }
        cmd.envs(&command.environment);

        if let Some(dir) = &command.working_directory {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TaskAction for ProcessAction {
    fn kind(&self) -> &str {
        "Process"
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> ActionOutcome {
        let node = ctx.node;
        let command = &node.command;

        if command.is_empty() {
            return ActionOutcome::fail("no executable declared");
        }

        debug!(node = %node.id, command = %command.display(), "Spawning process");

        let output = match Self::prepare(command, node.sandboxed).output().await {
            Ok(output) => output,
            Err(e) => {
                return ActionOutcome::fail(format!(
                    "unable to spawn '{}': {e}",
                    command.executable
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            let mut outcome = ActionOutcome::ok().with_output(stdout, stderr);
            outcome.exit_code = output.status.code();
            return outcome;
        }

        let reason = match output.status.code() {
            Some(code) => format!("Command {} failed with a nonzero exit code ({code})", node.name),
            None => format!("Command {} was terminated by a signal", node.name),
        };
        let mut outcome = ActionOutcome::fail(reason).with_output(stdout, stderr);
        outcome.exit_code = output.status.code();
        outcome
    }
}

/// The declaration surface for an opaque user task.
///
/// Build-setting substitution has already been applied to every string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTaskSpec {
    /// Command line; the first element is the executable.
    pub command_line: Vec<String>,
    /// Environment bindings.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    /// Declared inputs.
    #[serde(default)]
    pub inputs: Vec<Artifact>,
    /// Declared outputs; may include virtual outputs.
    #[serde(default)]
    pub outputs: Vec<Artifact>,
    /// Execution description for reporting.
    pub execution_description: String,
    /// Run with a cleared environment.
    #[serde(default)]
    pub enable_sandboxing: bool,
    /// Whether the task affects indexing preparation.
    #[serde(default)]
    pub prepare_for_indexing: bool,
}

impl CustomTaskSpec {
    /// Creates a custom task from a command line and description.
    #[must_use]
    pub fn new(
        command_line: impl IntoIterator<Item = impl Into<String>>,
        execution_description: impl Into<String>,
    ) -> Self {
        Self {
            command_line: command_line.into_iter().map(Into::into).collect(),
            execution_description: execution_description.into(),
            ..Self::default()
        }
    }

    /// Adds an environment binding.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Adds an input.
    #[must_use]
    pub fn input(mut self, artifact: Artifact) -> Self {
        self.inputs.push(artifact);
        self
    }

    /// Adds an output.
    #[must_use]
    pub fn output(mut self, artifact: Artifact) -> Self {
        self.outputs.push(artifact);
        self
    }

    /// Enables sandboxing.
    #[must_use]
    pub fn sandboxed(mut self) -> Self {
        self.enable_sandboxing = true;
        self
    }

    /// Converts the declaration into a work item that runs as a process.
    ///
    /// # Errors
    ///
    /// Returns an error if the command line is empty.
    pub fn into_work_item(self) -> Result<WorkItem, BuildGraphError> {
        let mut parts = self.command_line.into_iter();
        let executable = parts
            .next()
            .filter(|exe| !exe.trim().is_empty())
            .ok_or_else(|| {
                BuildGraphError::Config(format!(
                    "custom task '{}' has an empty command line",
                    self.execution_description
                ))
            })?;

        let mut command = CommandSpec::new(executable).args(parts);
        command.environment = self.environment;
        command.working_directory = self.working_directory;

        Ok(WorkItem {
            name: self.execution_description.clone(),
            tool: None,
            command,
            inputs: self.inputs,
            outputs: self.outputs,
            description: Some(self.execution_description),
            sandboxed: self.enable_sandboxing,
            affects_indexing: self.prepare_for_indexing,
            always_out_of_date: false,
        })
    }
}
