//! Command descriptions for task nodes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::normalize_path;

/// A fully resolved process invocation.
///
/// Argument order is significant; the environment is an unordered mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable path or name.
    #[serde(default)]
    pub executable: String,
    /// Arguments, in order.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Environment bindings.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Working directory, if different from the engine's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
}

impl CommandSpec {
    /// Creates a command for an executable.
    #[must_use]
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
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

    /// Returns true when no executable is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executable.trim().is_empty()
    }

    /// Returns the normalized command line, executable first.
    #[must_use]
    pub fn normalized_command_line(&self) -> Vec<String> {
        let executable = if self.executable.contains(std::path::MAIN_SEPARATOR) {
            normalize_path(std::path::Path::new(&self.executable))
                .to_string_lossy()
                .into_owned()
        } else {
            self.executable.clone()
        };
        std::iter::once(executable)
            .chain(self.arguments.iter().cloned())
            .collect()
    }

    /// Returns the command line as a single display string.
    #[must_use]
    pub fn display(&self) -> String {
        self.normalized_command_line()
            .iter()
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{}'", part.replace('\'', "'\\''"))
                } else {
                    part.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
