//! Classification of captured task output into diagnostics.

use regex::Regex;
use std::fmt::Debug;
use std::sync::LazyLock;

use crate::core::{Diagnostic, NodeId, Severity};

/// Turns a node's raw output into diagnostics.
pub trait OutputClassifier: Send + Sync + Debug {
    /// Classifies captured stdout and stderr of `node`.
    fn classify(&self, node: &NodeId, stdout: &str, stderr: &str) -> Vec<Diagnostic>;
}

/// Recognizes compiler-style `[location: ]error|warning|note: message` lines.
#[derive(Debug, Clone)]
pub struct RegexOutputClassifier {
    pattern: Regex,
}

const DEFAULT_PATTERN: &str =
    r"^(?:(?P<location>[^:\s][^:]*(?::\d+)*):\s*)?(?P<severity>(?:fatal )?error|warning|note):\s*(?P<message>.*)$";

// Compiled once per process; the pattern is a constant checked by tests.
#[allow(clippy::expect_used)]
static DEFAULT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_PATTERN).expect("default classifier pattern compiles"));

impl Default for RegexOutputClassifier {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_REGEX.clone(),
        }
    }
}

impl RegexOutputClassifier {
    /// Creates a classifier with the default pattern.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a classifier with a custom pattern.
    ///
    /// The pattern must define `severity` and `message` groups and may define
    /// a `location` group.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern does not compile.
    pub fn with_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    fn classify_line(&self, node: &NodeId, line: &str) -> Option<Diagnostic> {
        let caps = self.pattern.captures(line.trim_end())?;
        let severity = match caps.name("severity")?.as_str() {
            s if s.ends_with("error") => Severity::Error,
            "warning" => Severity::Warning,
            _ => Severity::Note,
        };
        let message = caps.name("message").map_or("", |m| m.as_str()).trim();
        let message = match caps.name("location") {
            Some(location) => format!("{}: {message}", location.as_str()),
            None => message.to_string(),
        };
        Some(Diagnostic::new(severity, message).for_node(node.clone()))
    }
}

impl OutputClassifier for RegexOutputClassifier {
    fn classify(&self, node: &NodeId, stdout: &str, stderr: &str) -> Vec<Diagnostic> {
        stdout
            .lines()
            .chain(stderr.lines())
            .filter_map(|line| self.classify_line(node, line))
            .collect()
    }
}
