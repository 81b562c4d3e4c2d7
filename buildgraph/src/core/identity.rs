//! Stable identities for targets and task nodes.
//!
//! Identities are plain strings derived from the project model, never from
//! memory addresses or insertion order, so the persisted state store can look
//! nodes up across build invocations.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Separator between a project name and a target name.
const PROJECT_SEPARATOR: &str = "::";

/// Fully qualified identity of a target: `project::target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId {
    /// Owning project name.
    pub project: String,
    /// Target name, unique within its project.
    pub name: String,
}

impl TargetId {
    /// Creates a new target identity.
    #[must_use]
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.project, PROJECT_SEPARATOR, self.name)
    }
}

impl Serialize for TargetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TargetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.split_once(PROJECT_SEPARATOR) {
            Some((project, name)) => Ok(Self::new(project, name)),
            None => Err(serde::de::Error::custom(format!(
                "target identity '{raw}' is not of the form 'project::target'"
            ))),
        }
    }
}

/// A reference to a target as written in a dependency declaration.
///
/// `"name"` refers to a target in the declaring project, `"project::name"`
/// refers to a target anywhere in the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetRef {
    /// Explicit project, if qualified.
    pub project: Option<String>,
    /// Target name.
    pub target: String,
}

impl TargetRef {
    /// Creates an unqualified reference.
    #[must_use]
    pub fn local(target: impl Into<String>) -> Self {
        Self {
            project: None,
            target: target.into(),
        }
    }

    /// Creates a project-qualified reference.
    #[must_use]
    pub fn qualified(project: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            target: target.into(),
        }
    }

    /// Parses `"target"` or `"project::target"`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.split_once(PROJECT_SEPARATOR) {
            Some((project, target)) => Self::qualified(project, target),
            None => Self::local(s),
        }
    }

    /// Resolves against the project the reference was written in.
    #[must_use]
    pub fn resolve(&self, declaring_project: &str) -> TargetId {
        TargetId::new(
            self.project.as_deref().unwrap_or(declaring_project),
            self.target.clone(),
        )
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.project {
            Some(project) => write!(f, "{project}{PROJECT_SEPARATOR}{}", self.target),
            None => write!(f, "{}", self.target),
        }
    }
}

impl Serialize for TargetRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TargetRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Stable identity of a task node.
///
/// Formed from the owning target, the phase position and name, and the
/// ordinal of the work item inside its phase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Derives the identity of a work item.
    #[must_use]
    pub fn derive(target: &TargetId, phase_index: usize, phase_name: &str, ordinal: usize) -> Self {
        Self(format!("{target}/{phase_index}-{phase_name}/{ordinal}"))
    }

    /// Wraps an existing identity string, e.g. one read back from disk.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
