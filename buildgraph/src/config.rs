//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::BuildGraphError;
use crate::scheduler::{ExecutorConfig, FailurePolicy};
use crate::state::DEFAULT_STATE_DIR;

/// Settings for a build operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum nodes in flight; 0 means available parallelism.
    #[serde(default)]
    pub max_concurrency: usize,
    /// What happens when a node fails.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Trace file; tracing is disabled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_file: Option<PathBuf>,
    /// Whether to write the build description manifest.
    #[serde(default = "default_write_build_description")]
    pub write_build_description: bool,
    /// Name of the state directory inside the build root.
    #[serde(default = "default_state_dir_name")]
    pub state_dir_name: String,
}

fn default_write_build_description() -> bool {
    true
}

fn default_state_dir_name() -> String {
    DEFAULT_STATE_DIR.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            failure_policy: FailurePolicy::default(),
            trace_file: None,
            write_build_description: default_write_build_description(),
            state_dir_name: default_state_dir_name(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, BuildGraphError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            BuildGraphError::Config(format!("unable to read '{}': {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for invalid values.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory name is empty or contains a
    /// path separator.
    pub fn validate(&self) -> Result<(), BuildGraphError> {
        let name = self.state_dir_name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(BuildGraphError::Config(format!(
                "state_dir_name '{}' must be a single directory name",
                self.state_dir_name
            )));
        }
        Ok(())
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Enables the trace file.
    #[must_use]
    pub fn with_trace_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_file = Some(path.into());
        self
    }

    /// Enables or disables the build description manifest.
    #[must_use]
    pub fn with_build_description(mut self, enabled: bool) -> Self {
        self.write_build_description = enabled;
        self
    }

    /// Sets the state directory name.
    #[must_use]
    pub fn with_state_dir_name(mut self, name: impl Into<String>) -> Self {
        self.state_dir_name = name.into();
        self
    }

    /// Returns the executor settings.
    #[must_use]
    pub fn executor(&self) -> ExecutorConfig {
        ExecutorConfig::default()
            .with_max_concurrency(self.max_concurrency)
            .with_failure_policy(self.failure_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.write_build_description);
        assert_eq!(config.state_dir_name, "BuildData");
        assert_eq!(config.failure_policy, FailurePolicy::ContinueOnFailure);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(
            &path,
            r#"{"max_concurrency": 4, "failure_policy": "stop_on_first_error", "trace_file": "/tmp/t.ndjson"}"#,
        )
        .unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.failure_policy, FailurePolicy::StopOnFirstError);
        assert_eq!(config.trace_file, Some(PathBuf::from("/tmp/t.ndjson")));
        assert_eq!(config.executor().effective_concurrency(), 4);
    }

    #[test]
    fn test_invalid_state_dir_rejected() {
        let config = EngineConfig::new().with_state_dir_name("a/b");
        assert!(matches!(config.validate(), Err(BuildGraphError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = EngineConfig::from_json_file("/nonexistent/engine.json").unwrap_err();
        assert!(err.to_string().starts_with("Configuration error"));
    }
}
