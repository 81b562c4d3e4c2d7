//! Declared task inputs and outputs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A declared input or output of a task node.
///
/// File artifacts are matched by their lexically normalized path. Virtual
/// artifacts have no backing file; they exist only to order consumers after
/// their producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "RawArtifact")]
pub enum Artifact {
    /// A concrete file or directory.
    File(PathBuf),
    /// A synthetic identifier used only for ordering.
    Virtual(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawArtifact {
    File(PathBuf),
    Virtual(String),
}

impl From<RawArtifact> for Artifact {
    fn from(raw: RawArtifact) -> Self {
        match raw {
            RawArtifact::File(path) => Self::file(path),
            RawArtifact::Virtual(name) => Self::Virtual(name),
        }
    }
}

impl Artifact {
    /// Creates a file artifact with a normalized path.
    #[must_use]
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::File(normalize_path(path.as_ref()))
    }

    /// Creates a virtual artifact.
    #[must_use]
    pub fn virtual_output(name: impl Into<String>) -> Self {
        Self::Virtual(name.into())
    }

    /// Returns the backing path, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::Virtual(_) => None,
        }
    }

    /// Returns true for virtual artifacts.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual(_))
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Virtual(name) => write!(f, "<{name}>"),
        }
    }
}

/// Lexically normalizes a path: drops `.` components and folds `..` into
/// the preceding component. The file system is never consulted.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                ) && normalized.pop();
                if !popped && !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize_path(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(normalize_path(Path::new("/../x")), PathBuf::from("/x"));
    }

    #[test]
    fn test_file_artifacts_match_after_normalization() {
        assert_eq!(Artifact::file("/out/./x.h"), Artifact::file("/out/sub/../x.h"));
    }

    #[test]
    fn test_artifact_serde() {
        let parsed: Vec<Artifact> =
            serde_json::from_str(r#"[{"file": "/tmp/./a.o"}, {"virtual": "done"}]"#).unwrap();
        assert_eq!(parsed[0], Artifact::file("/tmp/a.o"));
        assert!(parsed[1].is_virtual());
        assert_eq!(parsed[1].to_string(), "<done>");
    }
}
